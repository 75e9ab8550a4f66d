//! # Class and Metadata Walkers
//!
//! - [`class_table`]: live classes of a class loader's hash table
//! - [`class_records`]: class metadata records packed in class segments
//! - [`categories`]: native memory accounting categories and their roots

pub mod categories;
pub mod class_records;
pub mod class_table;

pub use categories::{root_categories, MemoryCategory, MemoryCategoryWalker};
pub use class_records::{ClassRecord, ClassRecordWalker};
pub use class_table::ClassTableWalker;
