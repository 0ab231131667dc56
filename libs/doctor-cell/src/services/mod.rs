pub mod profile;
pub mod slots;
