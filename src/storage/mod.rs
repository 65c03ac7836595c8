pub mod gallery;
pub mod journal;

pub use gallery::{Gallery, GalleryModel};
pub use journal::{AccessEntry, AttemptJournal};
