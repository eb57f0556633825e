//! Authentication commands.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use auth_bootstrap::{AuthBootstrap, AuthSnapshot, UserProfile};
use std::io::{self, Write};

/// Show the current auth status.
pub async fn status(bootstrap: &AuthBootstrap, format: &OutputFormat) -> Result<()> {
    bootstrap.initialize().await;
    let snapshot = bootstrap.snapshot();

    match format {
        OutputFormat::Json => output::print_json(&snapshot_json(&snapshot)),
        OutputFormat::Text => {
            println!("Authentication Status");
            println!("---------------------");
            if snapshot.is_authenticated {
                output::print_row("Status", "Logged in");
                if let Some(user) = &snapshot.user {
                    print_profile(user);
                }
                if let Some(session) = &snapshot.session {
                    let expires = session.provider_expiry.with_timezone(&chrono::Local);
                    output::print_row(
                        "Token expires",
                        &expires.format("%Y-%m-%d %H:%M").to_string(),
                    );
                }
            } else {
                output::print_row("Status", "Not logged in");
            }
            if let Some(error) = &snapshot.error {
                output::print_row("Error", error);
            }
        }
    }

    Ok(())
}

/// Sign in with Google.
///
/// The browser's final callback URL is pasted back here. Both halves of the
/// flow run in one process since the PKCE verifier is held in memory.
pub async fn login(bootstrap: &AuthBootstrap, format: &OutputFormat) -> Result<()> {
    bootstrap.initialize().await;
    let snapshot = bootstrap.snapshot();
    if let (true, Some(user)) = (snapshot.is_authenticated, &snapshot.user) {
        output::print_success(&format!("Already logged in as {}", display(user)), format);
        return Ok(());
    }

    let start = bootstrap.sign_in_with_google().await?;
    println!("Open this URL in your browser to sign in:");
    println!();
    println!("  {}", start.url);
    println!();

    let callback_url = prompt("Paste the URL you were redirected to: ")?;
    if callback_url.is_empty() {
        output::print_error("Callback URL is required", format);
        return Ok(());
    }

    let profile = bootstrap.complete_sign_in(&callback_url).await?;
    output::print_success(&format!("Logged in as {}", display(&profile)), format);
    Ok(())
}

/// Sign in through the backend's development login.
pub async fn dev_login(
    bootstrap: &AuthBootstrap,
    email: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    bootstrap.initialize().await;

    if !bootstrap.dev_login_available().await {
        output::print_error("Development login is not enabled on this backend", format);
        return Ok(());
    }

    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(());
    }

    let profile = bootstrap.dev_login(&email).await?;
    output::print_success(&format!("Logged in as {}", display(&profile)), format);
    Ok(())
}

/// Fetch the server-side profile for the stored session.
pub async fn whoami(bootstrap: &AuthBootstrap, format: &OutputFormat) -> Result<()> {
    bootstrap.initialize().await;
    if !bootstrap.snapshot().is_authenticated {
        output::print_error("Not logged in", format);
        return Ok(());
    }

    let profile = bootstrap.refresh_profile().await?;
    match format {
        OutputFormat::Json => output::print_json(&profile),
        OutputFormat::Text => print_profile(&profile),
    }
    Ok(())
}

/// Sign out and clear local auth state.
pub async fn logout(bootstrap: &AuthBootstrap, format: &OutputFormat) -> Result<()> {
    bootstrap.initialize().await;
    bootstrap.logout().await;
    output::print_success("Logged out", format);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn display(profile: &UserProfile) -> &str {
    profile
        .email
        .as_deref()
        .or(profile.name.as_deref())
        .unwrap_or(&profile.id)
}

fn print_profile(profile: &UserProfile) {
    output::print_row("User ID", &profile.id);
    if let Some(email) = &profile.email {
        output::print_row("Email", email);
    }
    if let Some(name) = &profile.name {
        output::print_row("Name", name);
    }
}

fn snapshot_json(snapshot: &AuthSnapshot) -> serde_json::Value {
    serde_json::json!({
        "logged_in": snapshot.is_authenticated,
        "phase": snapshot.phase,
        "user": snapshot.user,
        "expires_at": snapshot.session.as_ref().map(|s| s.provider_expiry.to_rfc3339()),
        "error": snapshot.error,
    })
}
