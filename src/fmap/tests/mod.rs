pub mod helpers;
mod tests_edge_cases;
