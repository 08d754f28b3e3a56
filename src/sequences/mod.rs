use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{Frame, Rgb, Sequence, SequenceError};

pub const SEQUENCE_FILE_EXTENSION: &str = "csv";
pub const FRAME_ID_COLUMN: &str = "FRAME_ID";

#[derive(Debug)]
pub enum SequenceFileError {
    NotFound { path: PathBuf },
    Io { path: PathBuf, source: std::io::Error },
    Pattern(glob::PatternError),
    Listing(glob::GlobError),
    MissingHeader,
    InvalidColumn { column: String },
    RowLength { line: usize, expected: usize, actual: usize },
    InvalidValue { line: usize, column: String, value: String },
    Structure(SequenceError),
}

impl fmt::Display for SequenceFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "sequence file '{}' does not exist", path.display()),
            Self::Io { path, source } => {
                write!(f, "failed to read sequence file '{}': {source}", path.display())
            }
            Self::Pattern(source) => write!(f, "invalid sequence directory pattern: {source}"),
            Self::Listing(source) => write!(f, "failed to list sequence files: {source}"),
            Self::MissingHeader => write!(f, "sequence file has no header row"),
            Self::InvalidColumn { column } => write!(
                f,
                "column '{column}' is neither {FRAME_ID_COLUMN} nor R_<n>, G_<n>, B_<n>"
            ),
            Self::RowLength {
                line,
                expected,
                actual,
            } => write!(f, "line {line} has {actual} cells, expected {expected}"),
            Self::InvalidValue {
                line,
                column,
                value,
            } => write!(
                f,
                "line {line} column '{column}' holds '{value}', expected a channel value in [0, 255]"
            ),
            Self::Structure(source) => write!(f, "sequence file is inconsistent: {source}"),
        }
    }
}

impl std::error::Error for SequenceFileError {}

/// The directory of playable sequence files.
#[derive(Clone, Debug)]
pub struct SequenceLibrary {
    directory: PathBuf,
}

impl SequenceLibrary {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Sorted paths of every `*.csv` directly inside the library directory.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, SequenceFileError> {
        let pattern = format!(
            "{}/*.{SEQUENCE_FILE_EXTENSION}",
            glob::Pattern::escape(&self.directory.to_string_lossy())
        );

        let mut files = glob::glob(&pattern)
            .map_err(SequenceFileError::Pattern)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(SequenceFileError::Listing)?;
        files.sort();
        Ok(files)
    }

    pub fn load(&self, path: &Path) -> Result<Sequence, SequenceFileError> {
        if !path.exists() {
            return Err(SequenceFileError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| SequenceFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        parse_sequence_csv(&text, name, Some(path.to_path_buf()))
    }
}

#[derive(Clone, Copy, Debug)]
enum Column {
    FrameId,
    Channel { light: usize, channel: usize },
}

fn parse_column(header: &str) -> Result<Column, SequenceFileError> {
    let header = header.trim();
    if header == FRAME_ID_COLUMN {
        return Ok(Column::FrameId);
    }

    let invalid = || SequenceFileError::InvalidColumn {
        column: header.to_owned(),
    };
    let (color, light) = header.split_once('_').ok_or_else(invalid)?;
    let channel = match color {
        "R" => 0,
        "G" => 1,
        "B" => 2,
        _ => return Err(invalid()),
    };
    let light = light.parse::<usize>().map_err(|_| invalid())?;

    Ok(Column::Channel { light, channel })
}

/// Accepts integers and integral decimals such as `255.0`.
fn parse_channel(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u8>() {
        return Some(value);
    }

    let value = raw.parse::<f64>().ok()?;
    if value.fract() == 0.0 && (0.0..=255.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

/// Parses the `FRAME_ID,R_0,G_0,B_0,R_1,...` layout into a sequence.
///
/// Light count is the highest light index in the header plus one; channels
/// without a column stay 0.
pub fn parse_sequence_csv(
    text: &str,
    name: impl Into<String>,
    source: Option<PathBuf>,
) -> Result<Sequence, SequenceFileError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines.next().ok_or(SequenceFileError::MissingHeader)?;
    let columns = header_line
        .split(',')
        .map(parse_column)
        .collect::<Result<Vec<_>, _>>()?;
    let light_count = columns
        .iter()
        .filter_map(|column| match column {
            Column::Channel { light, .. } => Some(light + 1),
            Column::FrameId => None,
        })
        .max()
        .unwrap_or(0);

    let mut frames = Vec::new();
    for (index, line) in lines {
        let line_number = index + 1;
        let cells: Vec<&str> = line.split(',').collect();
        if cells.len() != columns.len() {
            return Err(SequenceFileError::RowLength {
                line: line_number,
                expected: columns.len(),
                actual: cells.len(),
            });
        }

        let mut lights = vec![Rgb::BLACK; light_count];
        for (column, cell) in columns.iter().zip(cells) {
            let Column::Channel { light, channel } = *column else {
                continue;
            };
            let value = parse_channel(cell).ok_or_else(|| SequenceFileError::InvalidValue {
                line: line_number,
                column: channel_column_name(light, channel),
                value: cell.trim().to_owned(),
            })?;

            let target = &mut lights[light];
            match channel {
                0 => target.r = value,
                1 => target.g = value,
                _ => target.b = value,
            }
        }
        frames.push(Frame::new(lights));
    }

    Sequence::new(name, source, frames).map_err(SequenceFileError::Structure)
}

fn channel_column_name(light: usize, channel: usize) -> String {
    let color = match channel {
        0 => 'R',
        1 => 'G',
        _ => 'B',
    };
    format!("{color}_{light}")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use crate::model::Rgb;

    use super::{parse_sequence_csv, SequenceFileError, SequenceLibrary};

    fn temp_library(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "treelights-sequences-{suffix}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("temp library dir should be created");
        dir
    }

    #[test]
    fn parses_frame_id_and_channel_columns() {
        let sequence = parse_sequence_csv(
            "FRAME_ID,R_0,G_0,B_0,R_1,G_1,B_1\n0,255,0,0,0,255,0\n1,0.0,0,255.0,10,20,30\n",
            "two.csv",
            None,
        )
        .expect("valid csv should parse");

        assert_eq!(sequence.name(), "two.csv");
        assert_eq!(sequence.frame_count(), 2);
        assert_eq!(sequence.light_count(), 2);
        assert_eq!(sequence.frames()[0].lights()[1], Rgb::new(0, 255, 0));
        assert_eq!(sequence.frames()[1].lights()[0], Rgb::new(0, 0, 255));
    }

    #[test]
    fn columns_may_come_in_any_order_and_missing_channels_stay_dark() {
        let sequence = parse_sequence_csv("B_1,R_0\n9,7\n", "sparse", None)
            .expect("sparse header should parse");

        assert_eq!(sequence.light_count(), 2);
        assert_eq!(sequence.frames()[0].lights(), &[Rgb::new(7, 0, 0), Rgb::new(0, 0, 9)]);
    }

    #[test]
    fn rejects_bad_headers_rows_and_values() {
        assert!(matches!(
            parse_sequence_csv("", "empty", None),
            Err(SequenceFileError::MissingHeader)
        ));
        assert!(matches!(
            parse_sequence_csv("X_0\n1\n", "bad", None),
            Err(SequenceFileError::InvalidColumn { .. })
        ));
        assert!(matches!(
            parse_sequence_csv("R_0,G_0\n1\n", "short", None),
            Err(SequenceFileError::RowLength { line: 2, .. })
        ));
        assert!(matches!(
            parse_sequence_csv("R_0\n256\n", "hot", None),
            Err(SequenceFileError::InvalidValue { line: 2, .. })
        ));
        assert!(matches!(
            parse_sequence_csv("R_0,G_0,B_0\n", "no-rows", None),
            Err(SequenceFileError::Structure(_))
        ));
    }

    #[test]
    fn lists_only_csv_files_sorted() {
        let dir = temp_library("listing");
        fs::write(dir.join("b.csv"), "R_0\n1\n").expect("write b");
        fs::write(dir.join("a.csv"), "R_0\n1\n").expect("write a");
        fs::write(dir.join("notes.txt"), "ignore").expect("write notes");

        let library = SequenceLibrary::new(&dir);
        let files = library.list_files().expect("listing should succeed");
        fs::remove_dir_all(&dir).expect("cleanup should succeed");

        assert_eq!(files, vec![dir.join("a.csv"), dir.join("b.csv")]);
    }

    #[test]
    fn load_reports_missing_file_and_keeps_source_path() {
        let dir = temp_library("load");
        let path = dir.join("glow.csv");
        fs::write(&path, "FRAME_ID,R_0,G_0,B_0\n0,1,2,3\n").expect("write glow");

        let library = SequenceLibrary::new(&dir);
        let sequence = library.load(&path).expect("file should load");
        let missing = library.load(&dir.join("absent.csv"));
        fs::remove_dir_all(&dir).expect("cleanup should succeed");

        assert_eq!(sequence.name(), "glow.csv");
        assert_eq!(sequence.source(), Some(path.as_path()));
        assert!(matches!(missing, Err(SequenceFileError::NotFound { .. })));
    }
}
