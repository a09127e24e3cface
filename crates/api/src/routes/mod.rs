pub mod account;
pub mod admin;
pub mod auth;
pub mod leaderboard;
pub mod market;
pub mod trade;
