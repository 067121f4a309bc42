//! Record variables: growth, interleaving and padding rules

use cdf_classic::{Error, NcFile, NcType, Values, Version};
use pretty_assertions::assert_eq;

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| i as f32 * scale).collect()
}

#[test]
fn record_variable_grows_across_two_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unlim.nc");

    let n2 = 10;
    let n3 = 8;
    let record = n2 * n3;
    let first = ramp(4 * record, 0.5);
    let second: Vec<f32> = first.iter().map(|x| x * 2.0).collect();

    let mut nc = NcFile::create(&path).unwrap();
    nc.create_dimension("n1", None).unwrap();
    nc.create_dimension("n2", Some(n2)).unwrap();
    nc.create_dimension("n3", Some(n3)).unwrap();
    let foo = nc
        .create_variable("foo", NcType::Float, &["n1", "n2", "n3"])
        .unwrap();
    foo.set_all(Values::Float(first.clone())).unwrap();
    assert_eq!(foo.shape(), vec![4, 10, 8]);
    foo.set_records(4, &Values::Float(second.clone())).unwrap();
    assert_eq!(foo.shape(), vec![8, 10, 8]);
    nc.close().unwrap();

    let nc = NcFile::open(&path).unwrap();
    assert_eq!(nc.numrecs(), Some(8));
    let foo = nc.variable("foo").unwrap();
    assert_eq!(foo.shape(), vec![8, 10, 8]);

    let all = foo.values().unwrap();
    assert_eq!(all.slice(0, 4 * record), Values::Float(first));
    assert_eq!(all.slice(4 * record, 8 * record), Values::Float(second));

    // The sole record variable is unpadded: a 112-byte header plus
    // 8 records of 320 bytes each.
    assert_eq!(nc.filesize().unwrap(), 112 + 8 * 320);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 112 + 8 * 320);
}

#[test]
fn single_record_variable_has_unpadded_records() {
    let mut nc = NcFile::new(Version::Classic);
    nc.create_dimension("t", None).unwrap();
    nc.create_dimension("x", Some(3)).unwrap();
    let var = nc.create_variable("v", NcType::Byte, &["t", "x"]).unwrap();
    var.set_all(Values::Byte(vec![1, 2, 3, 4, 5, 6])).unwrap();

    let bytes = nc.build().unwrap();
    let nc2 = NcFile::parse(&bytes).unwrap();
    // 3-byte records are packed back to back, no alignment between them.
    assert_eq!(
        nc2.variable("v").unwrap().values().unwrap(),
        Values::Byte(vec![1, 2, 3, 4, 5, 6])
    );
    let header_len = bytes.len() - 6;
    assert_eq!(&bytes[header_len..], &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn two_record_variables_pad_every_record_slice() {
    let mut nc = NcFile::new(Version::Classic);
    nc.create_dimension("t", None).unwrap();
    nc.create_dimension("x", Some(3)).unwrap();
    let a = nc.create_variable("a", NcType::Byte, &["t", "x"]).unwrap();
    a.set_all(Values::Byte(vec![1, 2, 3, 4, 5, 6])).unwrap();
    let b = nc.create_variable("b", NcType::Short, &["t", "x"]).unwrap();
    b.set_all(Values::Short(vec![10, 20, 30, 40, 50, 60])).unwrap();

    let bytes = nc.build().unwrap();
    // recsize = pad4(3) + pad4(6) = 4 + 8; two records of data.
    let data_len = 2 * (4 + 8);
    let data = &bytes[bytes.len() - data_len..];
    assert_eq!(
        data,
        [
            1, 2, 3, 0, 0, 10, 0, 20, 0, 30, 0, 0, // record 0: a then b
            4, 5, 6, 0, 0, 40, 0, 50, 0, 60, 0, 0, // record 1
        ]
    );

    let nc2 = NcFile::parse(&bytes).unwrap();
    assert_eq!(
        nc2.variable("a").unwrap().values().unwrap(),
        Values::Byte(vec![1, 2, 3, 4, 5, 6])
    );
    assert_eq!(
        nc2.variable("b").unwrap().values().unwrap(),
        Values::Short(vec![10, 20, 30, 40, 50, 60])
    );
}

#[test]
fn canonical_order_on_disk_and_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("order.nc");

    let mut nc = NcFile::create(&path).unwrap();
    nc.create_dimension("t", None).unwrap();
    nc.create_dimension("x", Some(2)).unwrap();
    nc.create_variable("rec_early", NcType::Int, &["t"]).unwrap();
    nc.create_variable("fixed_late", NcType::Int, &["x"]).unwrap();
    nc.set_numrecs(0);
    nc.close().unwrap();

    let nc = NcFile::open(&path).unwrap();
    let names: Vec<&str> = nc.variables().iter().map(|v| v.name()).collect();
    assert_eq!(names, ["fixed_late", "rec_early"]);
}

#[test]
fn non_first_unlimited_dimension_rejected() {
    let mut nc = NcFile::new(Version::Classic);
    nc.create_dimension("n1", Some(4)).unwrap();
    let err = nc.create_dimension("n2", None).unwrap_err();
    assert!(matches!(err, Error::InvalidShape(_)));
    assert_eq!(nc.dimensions().len(), 1);
}

#[test]
fn unlimited_dimension_not_first_in_variable_rejected() {
    let mut nc = NcFile::new(Version::Classic);
    nc.create_dimension("n1", None).unwrap();
    nc.create_dimension("n2", Some(10)).unwrap();
    let err = nc
        .create_variable("data1", NcType::Double, &["n2", "n1"])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidShape(_)));

    // Using the unlimited dimension twice puts it in a non-first slot.
    let err = nc
        .create_variable("data2", NcType::Double, &["n1", "n1"])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidShape(_)));
}

#[test]
fn mask_and_scale_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scaled.nc");

    let mut nc = NcFile::create(&path).unwrap();
    nc.create_dimension("t", None).unwrap();
    nc.create_dimension("x", Some(4)).unwrap();
    let var = nc.create_variable("temp", NcType::Short, &["t", "x"]).unwrap();
    var.set_attr("missing_value", Values::Short(vec![-999]));
    var.set_attr("scale_factor", 0.5);
    var.set_attr("add_offset", 100.0);
    var.set_all(Values::Short(vec![2, -999, 0, 4])).unwrap();
    nc.close().unwrap();

    let nc = NcFile::open_with(
        &path,
        &cdf_classic::ReadOptions {
            mmap: true,
            mask_and_scale: true,
        },
    )
    .unwrap();
    assert_eq!(
        nc.variable("temp").unwrap().scaled(0).unwrap(),
        vec![Some(101.0), None, Some(100.0), Some(102.0)]
    );
}
