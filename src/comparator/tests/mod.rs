mod tests_order;
