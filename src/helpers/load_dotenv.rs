use crate::helpers::base_path;

pub fn load_dotenv() {
    if dotenv::dotenv().is_ok() {
        log::debug!("Loaded local .env")
    }
    // Also load $FP_DATA_DIR/.env if it exists
    let data_dir_dotenv = base_path::DATA_DIR.join(".env");
    if dotenv::from_path(&data_dir_dotenv).is_ok() {
        log::debug!("Loaded {}", data_dir_dotenv.display());
    }
}
