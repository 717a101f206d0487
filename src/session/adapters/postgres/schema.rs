//! Diesel schema for the session store's relational realization.
//!
//! Typed, individually indexed columns cover everything the viewer query
//! engine filters, sorts, or projects on directly; the nested
//! `metadata`/`agents`/`feedbacks` tree lives in a single `document` JSONB
//! column. See the physical storage mapping note in the crate's design
//! documentation for why a relational engine is used to realize a
//! document-per-session model.

diesel::table! {
    /// One row per session document.
    sessions (session_id) {
        /// Primary key; also the document's `session_id` field.
        #[max_length = 255]
        session_id -> Varchar,
        /// Opaque session-type tag.
        #[max_length = 255]
        session_type -> Varchar,
        /// Immutable application partition, if any.
        #[max_length = 255]
        application_name -> Nullable<Varchar>,
        /// Per-session viewer password, set once at creation.
        #[max_length = 64]
        session_viewer_password -> Varchar,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last-mutation timestamp.
        updated_at -> Timestamptz,
        /// Nested `{metadata, agents, feedbacks}` tree.
        document -> Jsonb,
    }
}
