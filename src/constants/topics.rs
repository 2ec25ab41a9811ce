pub const DATA_PFX: &str = "u/data";

pub fn data_topic(category: &str) -> String {
    format!("{DATA_PFX}/{category}")
}
