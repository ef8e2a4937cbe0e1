//! Database schema for the library database.

use crate::sqlite_persistence::{
    Column, ForeignKeyAction, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const ARTISTS_TABLE_V0: Table = Table {
    name: "artists",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("name", SqlType::Text).not_null(),
        Column::new("genre_status", SqlType::Text)
            .not_null()
            .default_value("'none'"),
        Column::new("genre_error", SqlType::Text),
        Column::new("workflow_id", SqlType::Text),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[("idx_artists_genre_status", "genre_status, created_at")],
    unique_constraints: &[&["name"]],
};

const ALBUMS_TABLE_V0: Table = Table {
    name: "albums",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("artist_id", SqlType::Integer)
            .not_null()
            .references("artists", "id", ForeignKeyAction::Cascade),
        Column::new("title", SqlType::Text).not_null(),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[],
    unique_constraints: &[&["artist_id", "title"]],
};

const TRACKS_TABLE_V0: Table = Table {
    name: "tracks",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("artist_id", SqlType::Integer)
            .not_null()
            .references("artists", "id", ForeignKeyAction::Cascade),
        Column::new("title", SqlType::Text).not_null(),
        Column::new("duration_ms", SqlType::Integer).not_null(),
        Column::new("youtube_code", SqlType::Text),
        Column::new("youtube_status", SqlType::Text)
            .not_null()
            .default_value("'none'"),
        Column::new("youtube_error", SqlType::Text),
        Column::new("download_status", SqlType::Text)
            .not_null()
            .default_value("'none'"),
        Column::new("download_error", SqlType::Text),
        Column::new("file_path", SqlType::Text),
        Column::new("audio_format", SqlType::Text),
        Column::new("downloaded_at", SqlType::Integer),
        Column::new("workflow_id", SqlType::Text),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[
        ("idx_tracks_youtube_status", "youtube_status, created_at"),
        ("idx_tracks_download_status", "download_status, created_at"),
    ],
    unique_constraints: &[&["artist_id", "title"]],
};

const ALBUM_TRACKS_TABLE_V0: Table = Table {
    name: "album_tracks",
    columns: &[
        Column::new("album_id", SqlType::Integer)
            .not_null()
            .references("albums", "id", ForeignKeyAction::Cascade),
        Column::new("track_id", SqlType::Integer)
            .not_null()
            .references("tracks", "id", ForeignKeyAction::Cascade),
    ],
    indices: &[],
    unique_constraints: &[&["album_id", "track_id"]],
};

const GENRES_TABLE_V0: Table = Table {
    name: "genres",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("name", SqlType::Text).not_null(),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

const ARTIST_GENRES_TABLE_V0: Table = Table {
    name: "artist_genres",
    columns: &[
        Column::new("artist_id", SqlType::Integer)
            .not_null()
            .references("artists", "id", ForeignKeyAction::Cascade),
        Column::new("genre_id", SqlType::Integer)
            .not_null()
            .references("genres", "id", ForeignKeyAction::Cascade),
    ],
    indices: &[],
    unique_constraints: &[&["artist_id", "genre_id"]],
};

const TRACK_PLAYS_TABLE_V0: Table = Table {
    name: "track_plays",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("track_id", SqlType::Integer)
            .not_null()
            .references("tracks", "id", ForeignKeyAction::Cascade),
        Column::new("played_at", SqlType::Integer).not_null(),
        Column::new("skipped", SqlType::Integer)
            .not_null()
            .default_value("0"),
        Column::new("workflow_id", SqlType::Text),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[("idx_track_plays_workflow", "workflow_id")],
    unique_constraints: &[&["track_id", "played_at"]],
};

const WORKFLOW_STATE_TABLE_V0: Table = Table {
    name: "workflow_state",
    columns: &[
        Column::new("workflow_id", SqlType::Text).primary_key(),
        Column::new("init_done", SqlType::Integer)
            .not_null()
            .default_value("0"),
        Column::new("genre_done", SqlType::Integer)
            .not_null()
            .default_value("0"),
        Column::new("yt_done", SqlType::Integer)
            .not_null()
            .default_value("0"),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[],
    unique_constraints: &[],
};

const NOTIFICATIONS_TABLE_V0: Table = Table {
    name: "notifications",
    columns: &[
        Column::new("id", SqlType::Integer).primary_key(),
        Column::new("channel", SqlType::Text).not_null(),
        Column::new("payload", SqlType::Text).not_null(),
        Column::new("created_at", SqlType::Integer)
            .not_null()
            .default_value(DEFAULT_TIMESTAMP),
    ],
    indices: &[("idx_notifications_channel", "channel, id")],
    unique_constraints: &[],
};

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ARTISTS_TABLE_V0,
        ALBUMS_TABLE_V0,
        TRACKS_TABLE_V0,
        ALBUM_TRACKS_TABLE_V0,
        GENRES_TABLE_V0,
        ARTIST_GENRES_TABLE_V0,
        TRACK_PLAYS_TABLE_V0,
        WORKFLOW_STATE_TABLE_V0,
        NOTIFICATIONS_TABLE_V0,
    ],
    migration: None,
}];
