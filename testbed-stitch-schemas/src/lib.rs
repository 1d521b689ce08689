pub mod cli_models;
pub mod settings;
pub mod chameleon_models;
pub mod fabric_models;

/// Default location of the optional YAML config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "testbed-stitch.yaml";

// environment variables read on top of the config file, these are the names already exported by
// a Chameleon openrc file and by the FABRIC tooling
pub const ENV_OS_AUTH_URL: &str = "OS_AUTH_URL";
pub const ENV_OS_REGION_NAME: &str = "OS_REGION_NAME";
pub const ENV_OS_PROJECT_ID: &str = "OS_PROJECT_ID";
pub const ENV_OS_USERNAME: &str = "OS_USERNAME";
pub const ENV_OS_PASSWORD: &str = "OS_PASSWORD";
pub const ENV_OS_TOKEN: &str = "OS_TOKEN";
pub const ENV_OS_APPLICATION_CREDENTIAL_ID: &str = "OS_APPLICATION_CREDENTIAL_ID";
pub const ENV_OS_APPLICATION_CREDENTIAL_SECRET: &str = "OS_APPLICATION_CREDENTIAL_SECRET";
pub const ENV_FABRIC_TOKEN_LOCATION: &str = "FABRIC_TOKEN_LOCATION";
pub const ENV_FABRIC_BASTION_USERNAME: &str = "FABRIC_BASTION_USERNAME";
pub const ENV_FABRIC_BASTION_KEY_LOCATION: &str = "FABRIC_BASTION_KEY_LOCATION";
pub const ENV_FABRIC_SLICE_PRIVATE_KEY_FILE: &str = "FABRIC_SLICE_PRIVATE_KEY_FILE";
pub const ENV_FABRIC_SLICE_PUBLIC_KEY_FILE: &str = "FABRIC_SLICE_PUBLIC_KEY_FILE";
