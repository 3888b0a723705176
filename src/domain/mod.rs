pub mod models;
pub mod offline_reward;
