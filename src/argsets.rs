use std::path::PathBuf;

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub port: Option<String>,
}

pub struct KvsGetArgs {
    pub key: String,
}

pub struct KvsSetArgs {
    pub key: String,
    pub value: String,
}
