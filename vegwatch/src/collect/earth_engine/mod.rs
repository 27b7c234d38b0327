pub mod auth;
pub mod ee_collect;
pub mod expression;
