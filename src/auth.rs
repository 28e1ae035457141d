use std::pin::Pin;

use actix_web::{web, FromRequest};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, PasswordHash,
};
use futures_util::Future;
use sqlx::{Pool, Sqlite};

use crate::{error::AppError, model::User, util};

// session lifetimes in seconds
pub const SESSION_TTL: i64 = 60 * 60;
pub const REMEMBER_TTL: i64 = 60 * 60 * 24 * 30;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    Ok(argon2
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Constant-time verification via argon2; only the exact original password
/// passes.
pub fn verify_password(password: &str, hash: &str) -> Result<(), argon2::password_hash::Error> {
    Argon2::default().verify_password(password.as_bytes(), &PasswordHash::new(hash)?)
}

/// Creates a session row for `user` and returns the opaque token to put in
/// the cookie.
pub async fn create_session(
    sql: &Pool<Sqlite>,
    user: i64,
    remember: bool,
) -> Result<String, AppError> {
    let token = util::generate_token();
    let ttl = if remember { REMEMBER_TTL } else { SESSION_TTL };
    let now = util::now_unix();
    let expires = now + ttl;

    // opportunistic cleanup, the table would otherwise only grow
    sqlx::query("DELETE FROM sessions WHERE expires <= ?")
        .bind(now)
        .execute(sql)
        .await?;

    sqlx::query("INSERT INTO sessions (user, token, expires) VALUES (?, ?, ?)")
        .bind(user)
        .bind(&token)
        .bind(expires)
        .execute(sql)
        .await?;

    Ok(token)
}

pub async fn destroy_session(sql: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(sql)
        .await?;

    Ok(())
}

/// Proof of an authenticated request. Extracting it fails with
/// `Unauthenticated` (a redirect to `/login`) when the token cookie is
/// missing, unknown, or expired.
pub struct Session {
    pub user: User,
}

impl FromRequest for Session {
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let sql = req
                .app_data::<web::Data<Pool<Sqlite>>>()
                .ok_or(AppError::Unauthenticated)?;

            let token = req.cookie("token").ok_or(AppError::Unauthenticated)?;
            let now = util::now_unix();

            let user = sqlx::query_as::<_, User>(
                "SELECT u.* FROM users u, sessions s WHERE s.token = ? AND s.expires > ? AND u.id = s.user",
            )
            .bind(token.value())
            .bind(now)
            .fetch_optional(sql.get_ref())
            .await?
            .ok_or(AppError::Unauthenticated)?;

            Ok(Session { user })
        })
    }
}

#[test]
fn password_round_trip() {
    let hash = hash_password("hunter2hunter2").unwrap();

    assert!(verify_password("hunter2hunter2", &hash).is_ok());
    assert!(verify_password("wrong password", &hash).is_err());
    // off by one character
    assert!(verify_password("hunter2hunter3", &hash).is_err());
    assert!(verify_password("hunter2hunter", &hash).is_err());
}

#[test]
fn hashes_are_salted() {
    let a = hash_password("hunter2hunter2").unwrap();
    let b = hash_password("hunter2hunter2").unwrap();

    assert_ne!(a, b);
}
