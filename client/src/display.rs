use comfy_table::{presets::UTF8_HORIZONTAL_ONLY, Attribute, Cell, ContentArrangement, Table};
use kernel::{CommunityFile, FileMetadata, Tier, UserInfo};

use crate::upload::ProgressItem;

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human readable size with up to two decimals, e.g. `1.5 KB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_owned();
    }
    let mut unit = 0;
    let mut scale = 1_u64;
    while unit < SIZE_UNITS.len() - 1 && bytes >= scale * 1024 {
        scale *= 1024;
        unit += 1;
    }
    let value = bytes as f64 / scale as f64;
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", SIZE_UNITS[unit])
}

/// One line summary of the user's tier and storage usage.
#[must_use]
pub fn usage_line(user: &UserInfo) -> String {
    let tier = match user.subscription_tier {
        Tier::Premium => "Premium Member",
        Tier::Basic => "Basic Tier",
    };
    format!(
        "{tier} - {:.1}MB / {:.1}MB used",
        user.storage_used, user.storage_limit
    )
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_HORIZONTAL_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120)
        .set_header(
            header
                .into_iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

#[must_use]
pub fn files_table(files: &[FileMetadata]) -> Table {
    let mut table = new_table(vec!["Id", "Name", "Size", "Uploaded", "Type"]);
    for f in files {
        table.add_row(vec![
            Cell::new(&f.id),
            Cell::new(&f.name),
            Cell::new(format_file_size(f.size)),
            Cell::new(f.upload_date.format("%Y-%m-%d")),
            Cell::new(&f.content_type),
        ]);
    }
    table
}

#[must_use]
pub fn progress_table(items: &[ProgressItem]) -> Table {
    let mut table = new_table(vec!["File", "Size", "Status"]);
    for item in items {
        table.add_row(vec![
            Cell::new(&item.name),
            Cell::new(format_file_size(item.size)),
            Cell::new(item.status.label()),
        ]);
    }
    table
}

#[must_use]
pub fn community_table(files: &[CommunityFile]) -> Table {
    let mut table = new_table(vec![
        "Id",
        "Name",
        "Size",
        "Shared by",
        "Downloads",
        "Rating",
        "Description",
    ]);
    for f in files {
        table.add_row(vec![
            Cell::new(&f.id),
            Cell::new(&f.name),
            Cell::new(format_file_size(f.size)),
            Cell::new(&f.shared_by),
            Cell::new(f.downloads),
            Cell::new(format!("{:.1} ({})", f.average_rating, f.rating_count)),
            Cell::new(&f.description),
        ]);
    }
    table
}
