use std::io::Write;
use std::path::PathBuf;

use orpheus::device::{
    FileMedium, MediumKind, MediumReader, OpticalDrive, cluster_for_kind, drive_selection_options,
    format_drive_table, human_bytes, kind_for_sectors,
};
use orpheus::sector::SECTOR_SIZE;
use tempfile::NamedTempFile;

#[test]
fn test_file_medium_reports_geometry() {
    let mut temp = NamedTempFile::new().unwrap();
    for n in 0..3u8 {
        temp.write_all(&vec![n; SECTOR_SIZE]).unwrap();
    }
    temp.flush().unwrap();
    let medium = FileMedium::open_buffered(temp.path()).unwrap();
    assert_eq!(medium.info().sectors, 3);
    assert_eq!(medium.info().kind, MediumKind::Cd);
    assert_eq!(medium.info().cluster, 16);
    assert!(!medium.direct_io());
}

#[test]
fn test_file_medium_reads_sectors() {
    let mut temp = NamedTempFile::new().unwrap();
    for n in 0..3u8 {
        temp.write_all(&vec![n; SECTOR_SIZE]).unwrap();
    }
    temp.flush().unwrap();
    let mut medium = FileMedium::open_buffered(temp.path()).unwrap();
    let mut buf = vec![0u8; SECTOR_SIZE];
    medium.read_sectors(1, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 1));
    let mut two = vec![0u8; 2 * SECTOR_SIZE];
    assert!(medium.read_sectors(2, &mut two).is_err());
}

#[test]
fn test_file_medium_missing_path() {
    assert!(FileMedium::open_buffered(&PathBuf::from("/nonexistent/disc")).is_err());
}

#[test]
fn test_kind_for_sectors() {
    assert_eq!(kind_for_sectors(0), MediumKind::Unknown);
    assert_eq!(kind_for_sectors(100), MediumKind::Cd);
    assert_eq!(kind_for_sectors(405_000), MediumKind::Cd);
    assert_eq!(kind_for_sectors(405_001), MediumKind::Dvd);
    assert_eq!(kind_for_sectors(3_000_000), MediumKind::Dvd);
    assert_eq!(kind_for_sectors(12_000_000), MediumKind::Bd);
}

#[test]
fn test_cluster_for_kind() {
    assert_eq!(cluster_for_kind(MediumKind::Cd), 16);
    assert_eq!(cluster_for_kind(MediumKind::Dvd), 16);
    assert_eq!(cluster_for_kind(MediumKind::Bd), 32);
}

#[test]
fn test_human_bytes() {
    assert_eq!(human_bytes(512), "512 B");
    assert_eq!(human_bytes(2048), "2.0 KiB");
    assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
}

#[test]
fn test_drive_table_formatting() {
    let drives = vec![
        OpticalDrive {
            name: "sr0".to_string(),
            path: PathBuf::from("/dev/sr0"),
            model: "ACME BD-RE".to_string(),
            capacity: Some(700 * 1024 * 1024),
        },
        OpticalDrive {
            name: "sr1".to_string(),
            path: PathBuf::from("/dev/sr1"),
            model: "ACME DVD".to_string(),
            capacity: None,
        },
    ];
    let table = format_drive_table(&drives);
    assert!(table.starts_with("NAME    CAPACITY    MODEL\n"));
    assert!(table.contains("sr0"));
    assert!(table.contains("700.0 MiB"));
    assert!(table.contains("no medium"));
    let options = drive_selection_options(&drives);
    assert_eq!(options.len(), 2);
    assert!(options[0].contains("ACME BD-RE"));
    assert!(options[1].contains("no medium"));
}
