//! Domain values produced by listing and lookup calls, plus the wire shapes
//! they are parsed from.

use serde::Deserialize;

use crate::errors::{Result, SheetsError};
use crate::header::TableHeader;

/// Only files of this MIME type can be read through the workbook API.
pub const XLSX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
}

/// A document library inside a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: String,
    pub site: Site,
    pub path: Vec<String>,
}

impl Drive {
    pub(crate) fn from_info(info: DriveInfo, site: Site) -> Result<Self> {
        if info.id.is_empty() {
            return Err(SheetsError::UnexpectedValue(
                "Drive id cannot be empty.".to_string(),
            ));
        }
        let path = vec!["sites".to_string(), site.name.clone(), info.name];
        Ok(Drive {
            id: info.id,
            site,
            path,
        })
    }
}

/// A workbook file located by search or listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub drive_id: String,
    pub file_id: String,
    pub name: String,
    pub path: Vec<String>,
}

impl File {
    pub(crate) fn from_drive_item(item: &DriveItem, path_prefix: &[String]) -> Result<Self> {
        let parent = item.parent_reference.as_ref().ok_or_else(|| {
            SheetsError::UnexpectedValue(format!(
                "Drive item \"{}\" has no parent reference.",
                item.name
            ))
        })?;
        let drive_id = parent.drive_id.clone().ok_or_else(|| {
            SheetsError::UnexpectedValue(format!("Drive item \"{}\" has no drive id.", item.name))
        })?;

        // The parent path may carry folder segments after "root:/".
        let mut path = path_prefix.to_vec();
        if let Some(parent_path) = parent.path.as_deref()
            && let Some((_, folders)) = parent_path.split_once("root:/")
        {
            path.extend(folders.split('/').map(str::to_string));
        }

        Ok(File {
            drive_id,
            file_id: item.id.clone(),
            name: item.name.clone(),
            path,
        })
    }
}

/// One tab inside a workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub drive_id: String,
    pub file_id: String,
    pub worksheet_id: String,
    /// 0, 1, 2, ...
    pub position: u32,
    pub name: String,
    pub visible: bool,
    pub header: Option<TableHeader>,
}

impl Worksheet {
    pub(crate) fn from_info(info: WorksheetInfo, drive_id: &str, file_id: &str) -> Self {
        let visible = info
            .visibility
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case("visible"));
        Worksheet {
            drive_id: drive_id.to_string(),
            file_id: file_id.to_string(),
            worksheet_id: info.id,
            position: info.position,
            name: info.name,
            visible,
            header: None,
        }
    }

    pub fn title(&self) -> String {
        if self.visible {
            self.name.clone()
        } else {
            format!("{} (hidden)", self.name)
        }
    }
}

// Wire shapes.

#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WorksheetInfo {
    pub id: String,
    pub name: String,
    pub position: u32,
    pub visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriveInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriveItem {
    pub id: String,
    pub name: String,
    pub file: Option<FileFacet>,
    pub parent_reference: Option<ParentReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileFacet {
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParentReference {
    pub drive_id: Option<String>,
    pub path: Option<String>,
}

/// Body of a range or header-row read.
#[derive(Debug, Deserialize)]
pub(crate) struct RangeBody {
    pub address: String,
    #[serde(default = "Vec::new")]
    pub text: Vec<Vec<String>>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}
