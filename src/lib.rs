pub mod db;
pub mod images;
pub mod models;
pub mod parsing;
pub mod scrapers;
pub mod zones;
