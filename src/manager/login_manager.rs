use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use rand::rngs::OsRng;

use super::{DbError, Role, User, Validation};

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone)]
pub struct LoginManager<'a> {
    pool: &'a sqlx::SqlitePool,
}

impl<'a> LoginManager<'a> {
    pub fn new(pool: &'a sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("email already registered")]
    EmailTaken,
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("email already registered and passwords do not match")]
    EmailTakenAndPasswordMismatch,
    #[error("wrong email or password")]
    WrongCredentials,
    #[error("invalid registration")]
    Invalid(Vec<super::FieldError>),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    DatabaseError(#[from] DbError),
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Error::DatabaseError(value.into())
    }
}

fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Hashing(e.to_string()))
}

fn compare_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

impl LoginManager<'_> {
    pub async fn get_user(&self, email: &str, password: &str) -> Result<User, Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email.trim())
            .fetch_optional(self.pool)
            .await?
            .ok_or(Error::WrongCredentials)?;

        if compare_password(password, &user.password_hash) {
            Ok(user)
        } else {
            Err(Error::WrongCredentials)
        }
    }

    pub async fn new_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<User, Error> {
        let email = email.trim();
        let mut validation = Validation::default();
        validation.check(!name.trim().is_empty(), "name", "Name is required");
        validation.check(
            email.contains('@') && email.len() >= 3,
            "email",
            "A valid email address is required",
        );
        validation.check(
            password.chars().count() >= MIN_PASSWORD_LEN,
            "password",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
        validation.finish().map_err(Error::Invalid)?;

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT id FROM users WHERE email = ?)")
            .bind(email)
            .fetch_one(self.pool)
            .await?;

        match (exists, password == confirm_password) {
            (true, false) => Err(Error::EmailTakenAndPasswordMismatch),
            (false, false) => Err(Error::PasswordMismatch),
            (true, true) => Err(Error::EmailTaken),
            (false, true) => self.persist_new_user(name.trim(), email, password, Role::User).await,
        }
    }

    /// Creates the bootstrap admin account, or promotes it if the email is already registered.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<User, Error> {
        let promoted = sqlx::query_as::<_, User>("UPDATE users SET role = ? WHERE email = ? RETURNING *")
            .bind(Role::Admin)
            .bind(email)
            .fetch_optional(self.pool)
            .await?;

        match promoted {
            Some(user) => Ok(user),
            None => {
                tracing::info!(email, "creating bootstrap admin account");
                self.persist_new_user("Administrator", email, password, Role::Admin)
                    .await
            }
        }
    }

    async fn persist_new_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, Error> {
        let hash = hash_password(password)?;
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users(name, email, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(name)
        .bind(email)
        .bind(hash)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(self.pool)
        .await?;
        Ok(user)
    }
}
