//! Session commands.

use basket_client::ClientContext;
use basket_client::session::{RefreshOutcome, Registration};
use basket_core::Email;
use secrecy::SecretString;

use crate::error::{CommandError, clear_sentry_user, set_sentry_user};

/// Sign in with email and password.
pub async fn login(
    ctx: &ClientContext,
    email: &str,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let email = Email::parse(email).map_err(CommandError::from)?;
    let session = ctx
        .session()
        .login(&email, &SecretString::from(password))
        .await?;

    set_sentry_user(&session.user.id, Some(session.user.email.as_str()));
    tracing::info!(
        user_id = %session.user.id,
        name = %session.user.name,
        "Signed in as {}",
        session.user.email
    );
    Ok(())
}

/// Create an account and sign in.
pub async fn register(
    ctx: &ClientContext,
    email: &str,
    name: &str,
    password: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let registration = Registration {
        email: Email::parse(email).map_err(CommandError::from)?,
        password: SecretString::from(password),
        name: name.to_string(),
    };
    let session = ctx.session().register(&registration).await?;

    set_sentry_user(&session.user.id, Some(session.user.email.as_str()));
    tracing::info!(user_id = %session.user.id, "Registered {}", session.user.email);
    Ok(())
}

/// Request a magic sign-in link.
pub async fn magic_link(ctx: &ClientContext, email: &str) -> Result<(), Box<dyn std::error::Error>> {
    let email = Email::parse(email).map_err(CommandError::from)?;
    ctx.session().login_with_magic_link(&email).await?;
    tracing::info!("Sign-in link sent to {email}");
    Ok(())
}

/// Sign out. Always clears the local session.
pub async fn logout(ctx: &ClientContext) {
    ctx.session().logout().await;
    clear_sentry_user();
}

/// Show the signed-in user.
pub fn whoami(ctx: &ClientContext) {
    match ctx.session().user() {
        Some(user) => tracing::info!(
            user_id = %user.id,
            role = user.role.as_str(),
            verified = user.email_verified,
            "{} <{}>",
            user.name,
            user.email
        ),
        None => tracing::info!("Not signed in"),
    }
}

/// Refresh the session now.
pub async fn refresh(ctx: &ClientContext) {
    match ctx.session().refresh().await {
        RefreshOutcome::Refreshed => tracing::info!("Session refreshed"),
        RefreshOutcome::Skipped => tracing::info!("No session to refresh"),
        RefreshOutcome::LoggedOut => {
            clear_sentry_user();
            tracing::warn!("Refresh refused, signed out");
        }
    }
}
