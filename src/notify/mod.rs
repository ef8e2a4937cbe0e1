//! Database-backed notification channels and the reconnecting relay.

mod channel;
mod relay;

pub use channel::{
    publish, ArtistInsertedPayload, TrackInsertedPayload, WorkflowUpdatedPayload, ARTISTS_CHANNEL,
    TRACKS_CHANNEL, WORKFLOW_CHANNEL,
};
pub use relay::{
    NotificationRelay, NotifyConnection, NotifyConnector, RawNotification, RelayPolicy,
    SqliteNotifyConnection, SqliteNotifyConnector,
};
