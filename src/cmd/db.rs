//! Database maintenance commands, `taskdeck migrate` and `taskdeck create-user`.

use anyhow::{Result, bail};

use taskdeck::auth;
use taskdeck::config::AppConfig;
use taskdeck::server::open_database;

pub fn cmd_migrate(config: &AppConfig) -> Result<()> {
    open_database(&config.database.path)?;
    println!("Database ready at {}", config.database.path.display());
    Ok(())
}

pub fn cmd_create_user(config: &AppConfig, email: &str, name: &str, password: &str) -> Result<()> {
    auth::validate_email(email)?;
    if name.trim().is_empty() {
        bail!("Name must not be empty");
    }
    auth::validate_password(password, config.auth.min_password_length)?;

    let db = open_database(&config.database.path)?;
    let hash = auth::hash_password(password)?;
    let Some(user) = db.create_user(email, name, &hash)? else {
        bail!("A user with email {} already exists", email.trim().to_lowercase());
    };
    println!("Created user {} <{}>", user.id, user.email);
    Ok(())
}
