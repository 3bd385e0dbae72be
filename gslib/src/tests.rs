use super::*;

const SAMPLE: &str = "\
Drill hole sample
4
Drill hole
X
Y
Grade
1   10.0  20.0   0.75
1   10.0  21.5   1.25

2   30.0  20.0  -999.0
";

#[test]
fn parse_sample() {
    let t = Table::parse(SAMPLE.as_bytes()).unwrap();
    assert_eq!(t.title(), "Drill hole sample");
    assert_eq!(t.names(), &["Drill hole", "X", "Y", "Grade"]);
    assert_eq!(t.ncols(), 4);
    assert_eq!(t.nrows(), 3);
    assert_eq!(t.column(2).unwrap(), &[20.0, 21.5, 20.0]);
    assert_eq!(t.column_by_name("Grade").unwrap()[1], 1.25);
    assert!(t.column_by_name("Au").is_none());
}

#[test]
fn missing_values() {
    let t = Table::parse(SAMPLE.as_bytes()).unwrap();
    assert_eq!(t.missing_rows(&[3]), vec![2]);
    assert!(t.missing_rows(&[1, 2]).is_empty());
    assert!(t.missing_rows(&[9]).is_empty());
}

#[test]
fn column_out_of_range() {
    let t = Table::parse(SAMPLE.as_bytes()).unwrap();
    assert!(matches!(
        t.column(4),
        Err(GslibError::ColumnOutOfRange { column: 4, ncols: 4 })
    ));
}

#[test]
fn short_row_is_rejected() {
    let err = Table::parse("t\n2\na\nb\n1 2\n3\n".as_bytes()).unwrap_err();
    assert!(matches!(err, GslibError::InvalidFormat { line: 6, .. }));
}

#[test]
fn bad_number_is_rejected() {
    let err = Table::parse("t\n1\na\nabc\n".as_bytes()).unwrap_err();
    assert!(matches!(err, GslibError::InvalidFormat { line: 4, .. }));
}

#[test]
fn bad_header_is_rejected() {
    assert!(Table::parse("t\nx\n".as_bytes()).is_err());
    assert!(Table::parse("t\n3\na\nb\n".as_bytes()).is_err());
    assert!(Table::parse("t\n0\n".as_bytes()).is_err());
}

#[test]
fn push_column_checks_length() {
    let mut t = Table::parse(SAMPLE.as_bytes()).unwrap();
    t.push_column("label", vec![0.0, 1.0, 1.0]).unwrap();
    assert_eq!(t.ncols(), 5);
    let err = t.push_column("bad", vec![0.0]).unwrap_err();
    assert!(matches!(
        err,
        GslibError::LengthMismatch {
            expected: 3,
            got: 1,
            ..
        }
    ));
}

#[test]
fn empty_table_takes_first_column_length() {
    let mut t = Table::new("out");
    t.push_column("a", vec![1.0, 2.0]).unwrap();
    assert_eq!(t.nrows(), 2);
    assert!(t.push_column("b", vec![1.0]).is_err());
}

#[test]
fn file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.dat");

    let mut t = Table::parse(SAMPLE.as_bytes()).unwrap();
    t.push_column("acens_clusters", vec![0.0, 0.0, 1.0]).unwrap();
    t.write(&path).unwrap();

    let back = Table::read(&path).unwrap();
    assert_eq!(back, t);
}

#[test]
fn read_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Table::read(dir.path().join("nope.dat")).unwrap_err();
    assert!(matches!(err, GslibError::Io(_)));
}
