use std::env;

use client::api::DEFAULT_API_URL;

struct VersionInfo {
    name: &'static str,
    version: &'static str,
    os: &'static str,
    architecture: &'static str,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            name: clap::crate_name!(),
            version: clap::crate_version!(),
            os: env::consts::OS,
            architecture: env::consts::ARCH,
        }
    }

    fn lines(&self) -> Vec<String> {
        vec![
            format!("Name           : {}", self.name),
            format!("Version        : {}", self.version),
            format!("OS             : {}", self.os),
            format!("Architecture   : {}", self.architecture),
            format!("Default API    : {DEFAULT_API_URL}"),
        ]
    }
}

pub fn run() {
    for line in VersionInfo::current().lines() {
        println!("{line}");
    }
}
