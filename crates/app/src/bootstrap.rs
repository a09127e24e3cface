use bullpen_core::config::AdminConfig;
use bullpen_core::store::port::{SystemStore, User, UserRole};
use bullpen_core::trade::entity::AccountId;
use bullpen_core::trade::port::{AccountPort, TradeError};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// # Summary
/// 确保配置中的管理员账号存在。
///
/// # Logic
/// 1. 用户不存在时以配置密码创建管理员，并要求首次登录修改密码。
/// 2. 用户已存在时保持原样 (不会重置密码或角色)。
/// 3. 为管理员开户，账户已存在时跳过。
pub async fn ensure_admin(
    system: &dyn SystemStore,
    accounts: &dyn AccountPort,
    admin: &AdminConfig,
    bcrypt_cost: u32,
    initial_balance: Decimal,
) -> Result<(), Box<dyn std::error::Error>> {
    match system.get_user(&admin.username).await? {
        Some(user) if user.role != UserRole::Admin => {
            warn!(
                "Configured admin {} exists but has role {}; leaving it unchanged",
                user.id, user.role
            );
        }
        Some(_) => {}
        None => {
            let password = admin.password.clone();
            let password_hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt_cost)).await??;
            let user = User {
                id: admin.username.clone(),
                name: admin.name.clone(),
                password_hash,
                role: UserRole::Admin,
                force_password_change: true,
                created_at: Utc::now(),
            };
            system.create_user(&user).await?;
            info!("Created admin user {} (password change required on first login)", user.id);
        }
    }

    match accounts
        .open_account(&AccountId(admin.username.clone()), initial_balance)
        .await
    {
        Ok(()) | Err(TradeError::AccountExists(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bullpen_core::config::AppConfig;
    use bullpen_store::account::SqliteAccountStore;
    use bullpen_store::system::SqliteSystemStore;

    #[tokio::test]
    async fn test_ensure_admin_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let system = SqliteSystemStore::new(tmp.path()).await.unwrap();
        let accounts = SqliteAccountStore::new(tmp.path()).unwrap();
        let config = AppConfig::default();

        ensure_admin(&system, &accounts, &config.admin, 4, config.game.initial_balance)
            .await
            .unwrap();
        let first = system.get_user("admin").await.unwrap().unwrap();
        assert_eq!(first.role, UserRole::Admin);
        assert!(first.force_password_change);
        assert!(bcrypt::verify("admin", &first.password_hash).unwrap());

        ensure_admin(&system, &accounts, &config.admin, 4, config.game.initial_balance)
            .await
            .unwrap();
        let second = system.get_user("admin").await.unwrap().unwrap();
        assert_eq!(first.password_hash, second.password_hash, "已有管理员不会被重置");

        let snapshot = accounts.snapshot(&AccountId("admin".into())).await.unwrap();
        assert_eq!(snapshot.available_balance, config.game.initial_balance);
    }
}
