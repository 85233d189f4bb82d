pub mod ambient;
pub mod calendar;
pub mod models;
pub mod moment;
pub mod streak;
pub mod timer;
