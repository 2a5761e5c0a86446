//! `embeds-sync migrate`.

use super::{migration_manager, open_target, print_json};
use crate::MigrateAction;
use embeds_config_and_utils::Config;
use serde::Serialize;
use tracing::info;

#[derive(Serialize)]
struct Applied {
    direction: &'static str,
    versions: Vec<i32>,
}

pub async fn run(config: &Config, action: MigrateAction) -> anyhow::Result<()> {
    let manager = migration_manager(config)?;
    let db = open_target(config).await?;

    let outcome = db
        .call(move |conn| {
            Ok(match action {
                MigrateAction::Up { to } => Outcome::Applied(Applied {
                    direction: "up",
                    versions: manager.apply_up(conn, to)?,
                }),
                MigrateAction::Down { to } => Outcome::Applied(Applied {
                    direction: "down",
                    versions: manager.apply_down(conn, to)?,
                }),
                MigrateAction::Status => Outcome::Status(manager.status(conn)?),
            })
        })
        .await;
    db.close().await?;

    match outcome? {
        Outcome::Applied(applied) => {
            info!(
                direction = applied.direction,
                versions = ?applied.versions,
                schema = %config.target_schema,
                "Migrations applied"
            );
            print_json(&applied)
        }
        Outcome::Status(status) => print_json(&status),
    }
}

enum Outcome {
    Applied(Applied),
    Status(embeds_database::MigrationStatus),
}
