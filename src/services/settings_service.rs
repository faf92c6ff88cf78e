use tracing::debug;

use crate::data::repository::{get_json, set_json, KeyValueStore, SETTINGS_KEY};
use crate::error::AppError;
use crate::models::settings::Settings;

/// Stored settings merged over defaults. A missing record yields defaults.
pub fn load_settings(kv: &dyn KeyValueStore) -> Result<Settings, AppError> {
    let stored: Option<Settings> = get_json(kv, SETTINGS_KEY)?;
    Ok(stored.unwrap_or_default().normalized())
}

pub fn save_settings(kv: &dyn KeyValueStore, settings: Settings) -> Result<Settings, AppError> {
    let settings = settings.normalized();
    set_json(kv, SETTINGS_KEY, &settings)?;
    debug!(?settings, "settings saved");
    Ok(settings)
}

/// Overlays the fields present in `patch` onto the current settings and
/// persists the result.
pub fn update_settings(
    kv: &dyn KeyValueStore,
    patch: serde_json::Value,
) -> Result<Settings, AppError> {
    let serde_json::Value::Object(fields) = patch else {
        return Err(AppError::General(
            "settings update must be a JSON object".to_string(),
        ));
    };

    let mut merged = serde_json::to_value(load_settings(kv)?)?;
    if let Some(current) = merged.as_object_mut() {
        current.extend(fields);
    }
    let settings: Settings = serde_json::from_value(merged)?;
    save_settings(kv, settings)
}
