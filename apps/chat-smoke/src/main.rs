mod config;
mod logging;

use std::{process, sync::Arc};

use chat_core::{DeliveryState, NormalizationContext, RoomStore, project_messages, project_rooms};
use chat_platform::JsonFilePersistence;
use chrono::Utc;
use tracing::{error, info};

use crate::config::AppConfig;

fn main() {
    logging::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            eprintln!("{err}");
            process::exit(2);
        }
    };

    let persistence = JsonFilePersistence::for_account(&config.data_dir, &config.user_id);
    info!(path = %persistence.path().display(), "loading chat store");
    let store = RoomStore::rehydrate(Arc::new(persistence), config.sync.dedup_tolerance_ms);

    if store.is_empty() {
        println!("No cached rooms for {}.", config.user_id);
        return;
    }

    let offset = NormalizationContext::new(&config.user_id, config.sync.utc_offset_minutes).offset;
    let now = Utc::now();
    for row in project_rooms(store.rooms(), None) {
        let messages = store.messages(&row.room_id);
        let failed = project_messages(messages, offset)
            .iter()
            .filter(|message| message.delivery == DeliveryState::Failed)
            .count();
        let idle = row
            .last_activity_at
            .map(|at| format!("{}m ago", (now - at).num_minutes()))
            .unwrap_or_else(|| "never".to_owned());
        let cursor = store.cursor(&row.room_id);

        println!(
            "{:<24} {:<20} msgs={:<5} unread={:<3} failed={:<3} next_page={} exhausted={} last={}",
            row.room_id,
            row.title,
            messages.len(),
            row.unread_count,
            failed,
            cursor.next_page,
            cursor.exhausted,
            idle,
        );
        if let Some(preview) = &row.preview {
            println!("    {preview}");
        }
    }
}
