pub mod config;
pub mod error;
pub mod game_api;
pub mod snapshot_repository;
pub mod storage;
pub mod token_store;
