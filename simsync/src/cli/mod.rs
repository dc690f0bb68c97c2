pub mod bugreport;
pub mod client;
pub mod server;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the SimSync backend";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment that users can send along with a bug report";

pub const SIGNUP_SUBCOMMAND: &str = "signup";
pub const SIGNUP_DESCRIPTION: &str = "Create an account with the given email and password";

pub const WHOAMI_SUBCOMMAND: &str = "whoami";
pub const WHOAMI_DESCRIPTION: &str = "Show the signed in account, tier and storage usage";

pub const LIST_SUBCOMMAND: &str = "list";
pub const LIST_DESCRIPTION: &str = "List backed up files";

pub const UPLOAD_SUBCOMMAND: &str = "upload";
pub const UPLOAD_DESCRIPTION: &str = "Back up one or more files";

pub const DROP_SUBCOMMAND: &str = "drop";
pub const DROP_DESCRIPTION: &str =
    "Back up dropped files, skipping anything that is not Sims 4 custom content";

pub const DOWNLOAD_SUBCOMMAND: &str = "download";
pub const DOWNLOAD_DESCRIPTION: &str = "Download a backed up file";

pub const DELETE_SUBCOMMAND: &str = "delete";
pub const DELETE_DESCRIPTION: &str = "Delete a backed up file";

pub const UPGRADE_SUBCOMMAND: &str = "upgrade";
pub const UPGRADE_DESCRIPTION: &str = "Start the Premium checkout";

pub const ROUTE_SUBCOMMAND: &str = "route";
pub const ROUTE_DESCRIPTION: &str = "Show where a front end path lands for the current auth state";

pub const COMMUNITY_SUBCOMMAND: &str = "community";
pub const COMMUNITY_DESCRIPTION: &str = "Browse and manage community shared files";

pub const SHARE_SUBCOMMAND: &str = "share";
pub const SHARE_DESCRIPTION: &str = "Share one of your files with the community";

pub const RATE_SUBCOMMAND: &str = "rate";
pub const RATE_DESCRIPTION: &str = "Rate a community file from 1 to 5 stars";

pub const UNSHARE_SUBCOMMAND: &str = "unshare";
pub const UNSHARE_DESCRIPTION: &str = "Remove your file from community sharing";
