pub mod core;
pub mod files;
pub mod grades;
pub mod masterdata;
pub mod occasions;
