pub mod story;
pub mod test_case;
