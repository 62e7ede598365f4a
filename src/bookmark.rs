use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::control::{ControlState, InFlightControls, ToggleControl, control_key};
use crate::db;
use crate::models::BookmarkKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookmarkToggleResult {
    pub kind: BookmarkKind,
    pub resource_id: String,
    pub bookmarked: bool,
    pub state: ControlState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BookmarkToggleResult {
    fn from_control(kind: BookmarkKind, resource_id: &str, control: &ToggleControl<bool>) -> Self {
        Self {
            kind,
            resource_id: resource_id.to_string(),
            bookmarked: *control.value(),
            state: control.state(),
            error: control.error().map(str::to_string),
        }
    }
}

/// Inverts the caller's bookmark on a resource, starting from the state the
/// client last saw. Never fails: problems are reported through the control
/// state.
#[instrument(skip(pool, in_flight))]
pub async fn toggle_bookmark(
    pool: &Pool<Sqlite>,
    in_flight: &InFlightControls,
    user_id: Option<&str>,
    kind: BookmarkKind,
    resource_id: &str,
    currently_bookmarked: bool,
) -> BookmarkToggleResult {
    let mut control = ToggleControl::new(currently_bookmarked);

    let Some(user_id) = user_id else {
        info!("Bookmark toggle without a session ignored");
        return BookmarkToggleResult::from_control(kind, resource_id, &control);
    };

    let Some(_guard) = in_flight.try_acquire(control_key(user_id, kind.as_str(), resource_id))
    else {
        control.begin(!currently_bookmarked);
        return BookmarkToggleResult::from_control(kind, resource_id, &control);
    };

    control.begin(!currently_bookmarked);

    let outcome = if currently_bookmarked {
        db::delete_bookmark(pool, kind, user_id, resource_id).await
    } else {
        db::insert_bookmark(pool, kind, user_id, resource_id).await
    };

    match outcome {
        Ok(()) => control.confirm(),
        Err(err) => {
            warn!(error = %err, "Bookmark write failed, reverting");
            control.revert(err.to_string());
        }
    }

    BookmarkToggleResult::from_control(kind, resource_id, &control)
}
