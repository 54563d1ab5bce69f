/*!
Operator-side admin grants

Signup never hands out the admin role. Promoting an account is an
explicit operator action that has to present the configured secret.
*/
use crate::models::{Role, User};
use crate::store::Store;
use crate::{Error, Result, LOG};

pub async fn grant_admin(
    store: &dyn Store,
    configured_code: Option<&str>,
    email: &str,
    code: &str,
) -> Result<User> {
    let expected = configured_code
        .ok_or_else(|| Error::Configuration("ADMIN_SECRET_CODE is not set".to_string()))?;
    if ring::constant_time::verify_slices_are_equal(expected.as_bytes(), code.as_bytes()).is_err() {
        slog::warn!(LOG, "admin grant refused, wrong code"; "email" => email);
        return Err(Error::Unauthorized("Invalid admin code".to_string()));
    }

    let email = email.trim().to_lowercase();
    let user = store
        .user_by_email(&email)
        .await?
        .ok_or_else(|| Error::NotFound(format!("No user with email {}", email)))?;
    let user = store
        .set_role(user.id, Role::Admin)
        .await?
        .ok_or_else(|| Error::NotFound(format!("No user with email {}", email)))?;
    slog::info!(LOG, "admin role granted"; "user_id" => user.id, "email" => &user.email);
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;
    use crate::store::memory::MemoryStore;

    async fn store_with_ada() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_user(NewUser {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                password_hash: "x".into(),
                role: Role::User,
            })
            .await
            .unwrap();
        store
    }

    #[async_std::test]
    async fn right_code_promotes() {
        let store = store_with_ada().await;
        let user = grant_admin(&store, Some("open-sesame"), "ADA@example.com", "open-sesame")
            .await
            .unwrap();
        assert_eq!(user.role, Role::Admin);
    }

    #[async_std::test]
    async fn wrong_code_is_refused() {
        let store = store_with_ada().await;
        let err = grant_admin(&store, Some("open-sesame"), "ada@example.com", "guess")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let user = store.user_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::User);
    }

    #[async_std::test]
    async fn unconfigured_code_refuses_everything() {
        let store = store_with_ada().await;
        let err = grant_admin(&store, None, "ada@example.com", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[async_std::test]
    async fn unknown_email_is_not_found() {
        let store = store_with_ada().await;
        let err = grant_admin(&store, Some("c"), "nobody@example.com", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
