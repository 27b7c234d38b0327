pub mod index_query;
pub mod vegetation_health;
