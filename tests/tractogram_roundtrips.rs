//
// tractogram_roundtrips.rs
// neuro-tools
//
// Integration tests covering file-level conversion across all four
// containers, native header carry-over, and failure atomicity.
//

use std::fs;

use neuro_tools::convert::{self, TractFormat};
use neuro_tools::tractogram::{ActiveArrays, PointAttribute, TractCollection, TractError};
use neuro_tools::{tck, trk, vtk};
use tempfile::tempdir;

/// Coordinates and values are all f32-exact so the track containers (f32 on
/// disk) round trip without tolerance windows.
fn sample_tracts() -> TractCollection {
    let mut tracts = TractCollection::from_streamlines(vec![
        vec![[0.5, -3.25, 7.0], [1.5, 2.5, 3.5], [-4.0, 0.125, 9.75]],
        vec![[10.0, 11.5, -12.25], [13.0, 14.5, 15.0]],
    ]);
    tracts
        .insert_attribute(
            "fa",
            PointAttribute::new(1, vec![vec![0.5, 0.75, 0.25], vec![0.125, 1.0]]),
        )
        .unwrap();
    tracts.set_active(ActiveArrays {
        scalars: Some("fa".into()),
        vectors: None,
        tensors: None,
    });
    tracts
}

fn streamline_sets(tracts: &TractCollection) -> Vec<Vec<[f64; 3]>> {
    tracts
        .streamlines()
        .map(|streamline| streamline.to_vec())
        .collect()
}

#[test]
fn every_container_round_trips_geometry() {
    let dir = tempdir().unwrap();
    let tracts = sample_tracts();

    let names = ["fibers.tck", "fibers.trk", "fibers.vtk", "fibers.vtp", "fibers.xml"];
    for name in names {
        let path = dir.path().join(name);
        let format = TractFormat::from_path(&path).unwrap();
        convert::write_tractogram(&path, format, &tracts, None).unwrap();

        let (reread, _header) = convert::read_tractogram(&path, format).unwrap();
        assert_eq!(streamline_sets(&reread), streamline_sets(&tracts), "{name}");
        assert_eq!(reread.num_points(), tracts.num_points(), "{name}");
    }
}

#[test]
fn polydata_containers_round_trip_attributes_and_roles() {
    let dir = tempdir().unwrap();
    let tracts = sample_tracts();

    for name in ["fibers.vtk", "fibers.vtp"] {
        let path = dir.path().join(name);
        let format = TractFormat::from_path(&path).unwrap();
        convert::write_tractogram(&path, format, &tracts, None).unwrap();

        let (reread, _header) = convert::read_tractogram(&path, format).unwrap();
        assert_eq!(reread, tracts, "{name}");
    }
}

#[test]
fn trk_round_trips_attribute_values() {
    let dir = tempdir().unwrap();
    let tracts = sample_tracts();
    let path = dir.path().join("fibers.trk");

    convert::write_tractogram(&path, TractFormat::Trk, &tracts, None).unwrap();
    let (reread, _header) = convert::read_tractogram(&path, TractFormat::Trk).unwrap();

    // TrackVis has no active-role concept; the values themselves survive.
    assert_eq!(reread.attributes(), tracts.attributes());
    assert!(reread.active().is_empty());
}

#[test]
fn conversion_chain_preserves_streamlines() {
    let dir = tempdir().unwrap();
    let tracts = sample_tracts();
    let origin = dir.path().join("origin.vtp");
    convert::write_tractogram(&origin, TractFormat::VtkXml, &tracts, None).unwrap();

    let mut previous = origin;
    for name in ["step1.tck", "step2.trk", "step3.vtk", "step4.xml"] {
        let next = dir.path().join(name);
        let summary = convert::convert(&previous, &next).unwrap();
        assert_eq!(summary.streamlines, tracts.len(), "{name}");
        assert_eq!(summary.points, tracts.num_points(), "{name}");
        previous = next;
    }

    let (last, _header) = convert::read_tractogram(&previous, TractFormat::VtkXml).unwrap();
    assert_eq!(streamline_sets(&last), streamline_sets(&tracts));
}

#[test]
fn same_format_conversion_keeps_native_headers() {
    let dir = tempdir().unwrap();
    let tracts = sample_tracts();

    // tck: a custom header key survives tck -> tck.
    let tck_in = dir.path().join("in.tck");
    let mut header = tck::TckHeader::new();
    header.insert("step_size".to_string(), "0.5".to_string());
    let mut bytes = Vec::new();
    tck::write(&mut bytes, &tracts, Some(&header)).unwrap();
    fs::write(&tck_in, bytes).unwrap();

    let tck_out = dir.path().join("out.tck");
    convert::convert(&tck_in, &tck_out).unwrap();
    let (_, reread) = tck::read(&fs::read(&tck_out).unwrap()).unwrap();
    assert_eq!(reread.get("step_size").map(String::as_str), Some("0.5"));

    // trk: voxel geometry survives trk -> trk.
    let trk_in = dir.path().join("in.trk");
    let mut trk_header = trk::TrkHeader::fresh();
    trk_header.voxel_size = [2.0, 2.5, 3.0];
    trk_header.origin = [1.0, 2.0, 3.0];
    let mut bytes = Vec::new();
    trk::write(&mut bytes, &tracts, Some(&trk_header)).unwrap();
    fs::write(&trk_in, bytes).unwrap();

    let trk_out = dir.path().join("out.trk");
    convert::convert(&trk_in, &trk_out).unwrap();
    let (_, reread) = trk::read(&fs::read(&trk_out).unwrap()).unwrap();
    assert_eq!(reread.voxel_size, [2.0, 2.5, 3.0]);
    assert_eq!(reread.origin, [1.0, 2.0, 3.0]);

    // vtk: the title line survives same-format and resets across formats.
    let vtk_in = dir.path().join("in.vtk");
    let mut bytes = Vec::new();
    vtk::write(&mut bytes, &tracts, Some("patient 42 bundle")).unwrap();
    fs::write(&vtk_in, bytes).unwrap();

    let vtk_out = dir.path().join("out.vtk");
    convert::convert(&vtk_in, &vtk_out).unwrap();
    let (_, title) = vtk::read(&fs::read(&vtk_out).unwrap()).unwrap();
    assert_eq!(title, "patient 42 bundle");

    let crossed = dir.path().join("crossed.vtp");
    convert::convert(&vtk_in, &crossed).unwrap();
    let back = dir.path().join("back.vtk");
    convert::convert(&crossed, &back).unwrap();
    let (_, title) = vtk::read(&fs::read(&back).unwrap()).unwrap();
    assert_eq!(title, vtk::DEFAULT_TITLE);
}

#[test]
fn unsupported_extensions_are_refused_without_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("fibers.tck");
    convert::write_tractogram(&input, TractFormat::Tck, &sample_tracts(), None).unwrap();

    let output = dir.path().join("fibers.nii");
    let err = convert::convert(&input, &output).unwrap_err();
    assert!(matches!(err, TractError::UnsupportedFormat { .. }));
    assert!(!output.exists());

    // The input extension is checked before anything is read.
    let missing = dir.path().join("missing.foo");
    let err = convert::convert(&missing, &dir.path().join("x.tck")).unwrap_err();
    assert!(matches!(err, TractError::UnsupportedFormat { .. }));
}

#[test]
fn malformed_input_produces_no_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("broken.vtk");
    fs::write(&input, b"# vtk DataFile Version 3.0\nbroken\nBINARY\n").unwrap();

    let output = dir.path().join("out.tck");
    let err = convert::convert(&input, &output).unwrap_err();
    assert!(matches!(err, TractError::MalformedContainer(_)));
    assert!(!output.exists());
}

#[test]
fn failed_writes_leave_existing_output_untouched() {
    let dir = tempdir().unwrap();

    // Eleven attribute arrays cannot fit the ten TrackVis name slots.
    let mut wide =
        TractCollection::from_streamlines(vec![vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]]);
    for index in 0..11 {
        wide.insert_attribute(
            format!("metric_{index:02}"),
            PointAttribute::new(1, vec![vec![0.5, 0.25]]),
        )
        .unwrap();
    }
    let input = dir.path().join("wide.vtp");
    convert::write_tractogram(&input, TractFormat::VtkXml, &wide, None).unwrap();

    let output = dir.path().join("out.trk");
    convert::write_tractogram(&output, TractFormat::Trk, &sample_tracts(), None).unwrap();
    let before = fs::read(&output).unwrap();

    let err = convert::convert(&input, &output).unwrap_err();
    assert!(matches!(err, TractError::ShapeMismatch(_)));
    assert_eq!(fs::read(&output).unwrap(), before);
}

#[test]
fn empty_collections_round_trip_everywhere() {
    let dir = tempdir().unwrap();
    let empty = TractCollection::new();

    for name in ["empty.tck", "empty.trk", "empty.vtk", "empty.vtp"] {
        let path = dir.path().join(name);
        let format = TractFormat::from_path(&path).unwrap();
        convert::write_tractogram(&path, format, &empty, None).unwrap();

        let (reread, _header) = convert::read_tractogram(&path, format).unwrap();
        assert!(reread.is_empty(), "{name}");
        assert_eq!(reread.num_points(), 0, "{name}");
    }
}

#[test]
fn zero_point_streamlines_survive_every_container() {
    let dir = tempdir().unwrap();
    let tracts = TractCollection::from_streamlines(vec![
        vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]],
        vec![],
        vec![[-1.0, -2.0, -3.0], [0.5, 1.5, 2.5]],
    ]);

    for name in ["gaps.tck", "gaps.trk", "gaps.vtk", "gaps.vtp"] {
        let path = dir.path().join(name);
        let format = TractFormat::from_path(&path).unwrap();
        convert::write_tractogram(&path, format, &tracts, None).unwrap();

        let (reread, _header) = convert::read_tractogram(&path, format).unwrap();
        assert_eq!(reread.lengths().collect::<Vec<_>>(), vec![3, 0, 2], "{name}");
        assert_eq!(streamline_sets(&reread), streamline_sets(&tracts), "{name}");
    }
}

#[test]
fn conversion_summary_reports_counts_and_formats() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("fibers.vtp");
    convert::write_tractogram(&input, TractFormat::VtkXml, &sample_tracts(), None).unwrap();

    let output = dir.path().join("fibers.tck");
    let summary = convert::convert(&input, &output).unwrap();
    assert_eq!(summary.input_format, "vtp");
    assert_eq!(summary.output_format, "tck");
    assert_eq!(summary.streamlines, 2);
    assert_eq!(summary.points, 5);
    assert_eq!(summary.attributes, vec!["fa".to_string()]);
}
