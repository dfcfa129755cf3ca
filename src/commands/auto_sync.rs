use anyhow::Result;
use calmesh_core::store::UserStore;

use super::App;

pub async fn run(app: &App, user: &str, enabled: bool) -> Result<()> {
    app.store.set_auto_sync(user, enabled).await?;

    if enabled {
        println!("Scheduled sync enabled for {user}.");
    } else {
        println!("Scheduled sync disabled for {user}. `calmesh sync {user}` still works.");
    }

    Ok(())
}
