//! Links coach user accounts to coach profiles

use mcd_shared::{new_id, IdPrefix};
use sqlx::PgPool;

use crate::error::ApiResult;
use crate::models::{CoachRow, UserRow};

/// Coach profile id for a coach account, linking or creating one when the
/// account has none yet
pub async fn ensure_coach_profile(pool: &PgPool, user: &UserRow) -> ApiResult<String> {
    if let Some(coach_id) = &user.linked_coach_id {
        return Ok(coach_id.clone());
    }

    let coach_id = match CoachRow::find_by_email(pool, &user.email).await? {
        Some(existing) => {
            sqlx::query(
                "UPDATE coaches SET user_id = COALESCE(user_id, $1), has_account = TRUE, \
                 updated_at = NOW() WHERE id = $2",
            )
            .bind(&user.user_id)
            .bind(&existing.id)
            .execute(pool)
            .await?;
            tracing::info!(email = %user.email, coach_id = %existing.id, "Linked user to existing coach profile");
            existing.id
        }
        None => {
            let coach_id = new_id(IdPrefix::Coach);
            sqlx::query(
                "INSERT INTO coaches (id, user_id, name, email, photo, organization_id, has_account) \
                 VALUES ($1, $2, $3, $4, $5, $6, TRUE)",
            )
            .bind(&coach_id)
            .bind(&user.user_id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.picture)
            .bind(&user.organization_id)
            .execute(pool)
            .await?;
            tracing::info!(email = %user.email, coach_id = %coach_id, "Created coach profile for user");
            coach_id
        }
    };

    sqlx::query("UPDATE users SET linked_coach_id = $1 WHERE user_id = $2")
        .bind(&coach_id)
        .bind(&user.user_id)
        .execute(pool)
        .await?;

    Ok(coach_id)
}

/// Profile for a newly invited coach: an existing profile with the same email
/// (case-insensitive), else a fresh one credited to the inviter
pub async fn find_or_create_invited_profile(
    pool: &PgPool,
    email: &str,
    name: &str,
    picture: Option<&str>,
    invited_by: &str,
) -> ApiResult<String> {
    if let Some(existing) = CoachRow::find_by_email(pool, email).await? {
        return Ok(existing.id);
    }

    let coach_id = new_id(IdPrefix::Coach);
    sqlx::query(
        "INSERT INTO coaches (id, name, email, photo, created_by) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&coach_id)
    .bind(name)
    .bind(email)
    .bind(picture)
    .bind(invited_by)
    .execute(pool)
    .await?;

    tracing::info!(email = %email, coach_id = %coach_id, "Auto-created coach profile for invited user");
    Ok(coach_id)
}

/// Fields written to a profile when its coach gets an account
#[derive(Debug, Default)]
pub struct AccountLink<'a> {
    pub name: Option<&'a str>,
    pub photo: Option<&'a str>,
    pub organization_id: Option<&'a str>,
}

pub async fn attach_account(
    pool: &PgPool,
    coach_id: &str,
    user_id: &str,
    link: AccountLink<'_>,
) -> ApiResult<()> {
    sqlx::query(
        "UPDATE coaches SET user_id = $1, has_account = TRUE, \
         name = COALESCE($2, name), photo = COALESCE($3, photo), \
         organization_id = COALESCE($4, organization_id), updated_at = NOW() \
         WHERE id = $5",
    )
    .bind(user_id)
    .bind(link.name)
    .bind(link.photo)
    .bind(link.organization_id)
    .bind(coach_id)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %user_id, coach_id = %coach_id, "Linked user to coach profile");
    Ok(())
}
