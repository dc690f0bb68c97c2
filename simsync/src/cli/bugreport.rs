use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

const REPORTED_VARIABLES: &[&str] = &[
    "SHELL",
    "TERM",
    "RUST_LOG",
    "SIMSYNC_API_URL",
    "SIMSYNC_IDENTITY_URL",
    "SIMSYNC_ORIGIN",
    "SIMSYNC_DOWNLOAD_DIR",
    "SIMSYNC_PORT",
    "SIMSYNC_DATA_DIR",
    "SIMSYNC_PUBLIC_URL",
    "SIMSYNC_DATA_FILE",
    "SIMSYNC_TOKEN_TTL",
    "SIMSYNC_CHECKOUT_URL",
];

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(REPORTED_VARIABLES))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
