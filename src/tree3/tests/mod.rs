pub mod helpers;
mod tests_comparator;
mod tests_edge_cases;
mod tests_iter;
mod tests_tx;
