//! Object storage
//!
//! Local filesystem placement of accepted uploads into a permanent and a
//! temporary area.

pub mod object_store;
pub mod types;

pub use object_store::{
    allocate_name, is_valid_stored_name, sanitize_extension, ObjectReader, ObjectStore,
    StagedObject,
};
pub use types::{StorageArea, StoreError};
