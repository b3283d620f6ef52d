pub mod faulty;
pub mod test_cluster;
