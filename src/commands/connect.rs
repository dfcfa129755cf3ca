use anyhow::{Context, Result};
use calmesh_core::store::{Account, CredentialStore, Credentials, Provider};
use calmesh_core::CalendarRemote;
use calmesh_provider_caldav::{CaldavCredentials, CaldavRemote};
use owo_colors::OwoColorize;

use super::App;

pub async fn caldav(
    app: &App,
    user: &str,
    username: String,
    password: Option<String>,
    server_url: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password("Password (app-specific password for iCloud)")?,
    };
    let server_url = server_url.unwrap_or_else(|| app.config.caldav.server_url.clone());

    println!("Checking credentials against {server_url}...");

    let remote = CaldavRemote::new(CaldavCredentials {
        server_url: server_url.clone(),
        username: username.clone(),
        password: password.clone(),
    })?
    .with_vevent_only(app.config.caldav.vevent_only);
    let calendars = remote
        .list_calendars()
        .await
        .context("Could not list calendars with these credentials")?;

    let account = Account::new(
        user,
        Provider::CalDav,
        Credentials::Basic {
            username,
            password,
            server_url,
        },
    );
    app.store.save_account(account).await?;

    println!(
        "{} Connected CalDAV for {user} ({} calendars found)",
        "✓".green(),
        calendars.len()
    );
    print_next_steps(user);
    Ok(())
}

pub async fn google(app: &App, user: &str, access_token: String, refresh_token: String) -> Result<()> {
    let account = Account::new(
        user,
        Provider::Google,
        Credentials::OAuth {
            access_token,
            refresh_token,
            expires_at: None,
        },
    );
    app.store.save_account(account).await?;

    println!("{} Saved Google tokens for {user}", "✓".green());
    if app.config.google.client_id.is_empty() {
        println!(
            "{} No Google client_id configured; tokens can't be refreshed until one is set (see `calmesh config`).",
            "!".yellow()
        );
    }
    print_next_steps(user);
    Ok(())
}

fn print_next_steps(user: &str) {
    println!("\nNext:");
    println!("  calmesh calendars {user}");
    println!("  calmesh map {user} --display-name <name>");
}

/// Prompt the user for password input (hidden).
fn prompt_password(label: &str) -> Result<String> {
    let prompt = format!("{}: ", label);
    rpassword::prompt_password(&prompt).context("Failed to read password")
}
