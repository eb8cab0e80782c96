pub mod db;
pub mod results;
pub mod runs;
pub mod schema;
pub mod store;
pub mod test_cases;
pub mod versions;
