use super::*;
use tempfile::TempDir;

const MAP: &str = "\
# Mapfile. Created by GNU ddrescue version 1.27
# Command line: ddrescue -d -n /dev/sdb out.img out.img.map
# Start time:   2024-03-01 10:00:00
# current_pos  current_status  current_pass
0x00100000     +               1
#      pos        size  status
0x00000000  0x00001000  +
0x00001000  0x00000400  -
0x00001400  0x00000C00  +
0x00002000  0x00000200  ?
0x00002200  0x00000200  *
0x00002400  0x00000200  /
0x00002600  0x000FDA00  +
";

#[test]
fn test_parse_map_skips_comments_and_status_line() {
    let blocks = parse_map(MAP);
    assert_eq!(blocks.len(), 7);
    assert_eq!(
        blocks[1],
        MapBlock {
            pos: 0x1000,
            size: 0x400,
            status: BlockStatus::BadSector,
        }
    );
}

#[test]
fn test_old_two_column_status_line() {
    let blocks = parse_map("0x00000000     ?\n0x00000000  0x00010000  ?\n");
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].status, BlockStatus::NonTried);
}

#[test]
fn test_bad_ranges_in_sectors() {
    let ranges = bad_ranges(&parse_map(MAP));
    assert_eq!(
        ranges,
        vec![
            BadSectorRange { start_sector: 8, end_sector: 9 },
            BadSectorRange { start_sector: 16, end_sector: 16 },
            BadSectorRange { start_sector: 17, end_sector: 17 },
            BadSectorRange { start_sector: 18, end_sector: 18 },
        ]
    );
    assert_eq!(ranges[0].size_in_sectors(), 2);
}

#[test]
fn test_summary_totals() {
    let summary = summarize(&parse_map(MAP));
    assert_eq!(summary.unreadable_bytes, 0x400 + 3 * 0x200);
    assert_eq!(summary.rescued_bytes + summary.unreadable_bytes, 0x100000);
}

#[test]
fn test_garbage_lines_ignored() {
    assert!(parse_map("hello world again\n0x10 zz +\n0x0 0x10 ++\n").is_empty());
}

#[test]
fn test_log_writes_header_once_and_appends() {
    let dir = TempDir::new().unwrap();
    let path = BadSectorLog::default_path(dir.path(), "sdb", "20240301_100000");
    let mut log = BadSectorLog::new(&path, "/dev/sdb");

    let first = vec![BadSectorRange { start_sector: 8, end_sector: 9 }];
    assert_eq!(log.append(&first).unwrap(), 1);

    let second = vec![
        BadSectorRange { start_sector: 8, end_sector: 9 },
        BadSectorRange { start_sector: 16, end_sector: 20 },
    ];
    assert_eq!(log.append(&second).unwrap(), 1);
    assert_eq!(log.append(&second).unwrap(), 0);

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "# Bad sectors for /dev/sdb");
    assert!(lines[1].starts_with("# Extracted on "));
    assert_eq!(lines[2], "# Format: start_sector end_sector size_in_sectors");
    assert_eq!(&lines[3..], &["8 9 2", "16 20 5"]);
    assert_eq!(log.recorded_count(), 2);
}

#[test]
fn test_log_preserves_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("badsectors.txt");
    std::fs::write(&path, "# Bad sectors for /dev/sdb\n1 1 1\n").unwrap();

    let mut log = BadSectorLog::new(&path, "/dev/sdb");
    log.append(&[BadSectorRange { start_sector: 2, end_sector: 3 }]).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "# Bad sectors for /dev/sdb\n1 1 1\n2 3 2\n");
}

#[test]
fn test_empty_append_does_not_create_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("never.txt");
    let mut log = BadSectorLog::new(&path, "/dev/sdb");
    assert_eq!(log.append(&[]).unwrap(), 0);
    assert!(!path.exists());
}
