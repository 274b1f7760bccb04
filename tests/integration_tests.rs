//! Integration tests for ahn-dl runs
//!
//! Tiles are generated as small LAS files and served from a local mock server,
//! so the whole resolve -> fetch -> filter -> merge path runs without touching
//! the real tile mirror.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ahn_dl::{AreaOfInterest, Config, Error, Region, RegionTable, RunRequest, TileGrid};
use geo::{polygon, Polygon};
use las::point::Classification;
use las::{Builder, Point, Read as _, Transform, Vector, Write as _, Writer};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Pt = (f64, f64, f64, u8);

/// Encode points as a LAS 1.2 file with the given offset and a centimetre scale.
fn las_bytes(dir: &Path, offset: (f64, f64, f64), points: &[Pt]) -> Vec<u8> {
    let file = dir.join("fixture.las");
    let mut builder = Builder::from((1, 2));
    builder.transforms = Vector {
        x: Transform { scale: 0.01, offset: offset.0 },
        y: Transform { scale: 0.01, offset: offset.1 },
        z: Transform { scale: 0.01, offset: offset.2 },
    };
    let mut writer = Writer::from_path(&file, builder.into_header().unwrap()).unwrap();
    for &(x, y, z, class) in points {
        writer
            .write(Point {
                x,
                y,
                z,
                classification: Classification::new(class).unwrap(),
                ..Default::default()
            })
            .unwrap();
    }
    writer.close().unwrap();
    drop(writer);
    let bytes = std::fs::read(&file).unwrap();
    std::fs::remove_file(&file).unwrap();
    bytes
}

fn read_output(path: &Path) -> (las::Header, Vec<Point>) {
    let mut reader = las::Reader::from_path(path).unwrap();
    let header = reader.header().clone();
    let points = reader.points().map(|p| p.unwrap()).collect();
    (header, points)
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect()
}

fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
    ]
}

/// Region "Centrum" straddles tiles A and B; tile C is far away.
fn tables() -> (RegionTable, TileGrid) {
    let regions = RegionTable::new(
        28992,
        vec![Region {
            name: "Centrum".into(),
            polygon: rect(85000.0, 446000.0, 85200.0, 446200.0),
        }],
    );
    let grid = TileGrid::new(
        28992,
        vec![
            ("TILE_A".into(), rect(84000.0, 445000.0, 85100.0, 447000.0)),
            ("TILE_B".into(), rect(85100.0, 445000.0, 86000.0, 447000.0)),
            ("TILE_C".into(), rect(90000.0, 445000.0, 91000.0, 447000.0)),
        ],
    );
    (regions, grid)
}

const TILE_A: [Pt; 3] = [
    (85050.0, 446100.0, 1.0, 2),
    (85050.0, 446100.0, 2.0, 6),
    (84500.0, 446100.0, 3.0, 2),
];

const TILE_B: [Pt; 3] = [
    (85150.0, 446150.0, 4.0, 2),
    (85199.5, 446010.0, 5.0, 2),
    (85500.0, 446100.0, 6.0, 2),
];

/// Serve tiles A and B as `/AHN4_T/{id}.{extension}`.
async fn mount_tiles(server: &MockServer, extension: &str) {
    let scratch = tempdir().unwrap();
    for (name, offset, points) in [
        ("TILE_A", (84000.0, 445000.0, 0.0), &TILE_A),
        ("TILE_B", (85100.0, 445000.0, 0.0), &TILE_B),
    ] {
        let body = las_bytes(scratch.path(), offset, points);
        Mock::given(method("GET"))
            .and(path(format!("/AHN4_T/{name}.{extension}")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/octet-stream"))
            .mount(server)
            .await;
    }
}

fn centrum(output: PathBuf) -> RunRequest {
    RunRequest::new(AreaOfInterest::NamedRegion("Centrum".into()), output)
}

struct Fixture {
    server: MockServer,
    staging: TempDir,
    out_dir: TempDir,
}

impl Fixture {
    async fn start() -> Self {
        let server = MockServer::start().await;
        mount_tiles(&server, "las").await;
        Self {
            server,
            staging: tempdir().unwrap(),
            out_dir: tempdir().unwrap(),
        }
    }

    fn config(&self) -> Config {
        Config {
            base_url: format!("{}/AHN4_T/", self.server.uri()),
            extension: "las".into(),
            staging_dir: self.staging.path().to_path_buf(),
            ..Default::default()
        }
    }

    fn output(&self, name: &str) -> PathBuf {
        self.out_dir.path().join(name)
    }
}

#[tokio::test]
async fn test_region_run_clips_filters_and_merges() {
    let fixture = Fixture::start().await;
    let (regions, grid) = tables();
    let output = fixture.output("centrum.las");

    let mut request = RunRequest::new(AreaOfInterest::NamedRegion("centrum".into()), &output);
    request.include_classes = BTreeSet::from([2]);

    let written = ahn_dl::run(&fixture.config(), &regions, &grid, request).await.unwrap();
    assert_eq!(written, 3);

    let (header, points) = read_output(&output);
    assert_eq!(header.number_of_points(), 3);
    // Tile A comes first in the grid and fixes the output offset.
    assert_eq!(header.transforms().x.offset, 84000.0);
    assert_eq!(header.transforms().y.offset, 445000.0);

    let expected = [TILE_A[0], TILE_B[0], TILE_B[1]];
    for (point, &(x, y, z, class)) in points.iter().zip(&expected) {
        assert!((point.x - x).abs() < 1e-6);
        assert!((point.y - y).abs() < 1e-6);
        assert!((point.z - z).abs() < 1e-6);
        assert_eq!(u8::from(point.classification), class);
    }

    // Only A and B were requested.
    let requested: Vec<String> = fixture
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(requested.len(), 2);
    assert!(!requested.iter().any(|p| p.contains("TILE_C")));

    assert!(files_in(fixture.staging.path()).is_empty());
    assert_eq!(files_in(fixture.out_dir.path()), vec![output]);
}

#[tokio::test]
async fn test_region_run_without_city_clip_keeps_whole_tiles() {
    let fixture = Fixture::start().await;
    let (regions, grid) = tables();
    let output = fixture.output("tiles.las");

    let mut request = RunRequest::new(AreaOfInterest::NamedRegion("Centrum".into()), &output);
    request.clip_to_area = false;
    request.exclude_classes = BTreeSet::from([6]);

    let written = ahn_dl::run(&fixture.config(), &regions, &grid, request).await.unwrap();
    assert_eq!(written, 5);
}

#[tokio::test]
async fn test_bbox_run_with_decimation() {
    let fixture = Fixture::start().await;
    let (regions, grid) = tables();
    let output = fixture.output("box.las");

    let mut request = RunRequest::new(
        AreaOfInterest::BoundingBox {
            bounds: [84400.0, 446000.0, 85160.0, 446200.0],
            epsg: 28992,
        },
        &output,
    );
    request.decimate = Some(2);

    // Tile A: decimation keeps positions 0 and 2, both inside the box.
    // Tile B: the box clip keeps only the first point, decimation keeps it.
    let written = ahn_dl::run(&fixture.config(), &regions, &grid, request).await.unwrap();
    assert_eq!(written, 3);

    let (_, points) = read_output(&output);
    let zs: Vec<f64> = points.iter().map(|p| (p.z * 100.0).round() / 100.0).collect();
    assert_eq!(zs, vec![1.0, 3.0, 4.0]);
}

#[tokio::test]
async fn test_failed_transfer_leaves_nothing_behind() {
    let fixture = Fixture::start().await;
    let (regions, _) = tables();
    // Same tiles plus one the server does not have.
    let grid = TileGrid::new(
        28992,
        vec![
            ("TILE_A".into(), rect(84000.0, 445000.0, 85100.0, 447000.0)),
            ("TILE_GONE".into(), rect(85100.0, 446000.0, 85150.0, 446050.0)),
            ("TILE_B".into(), rect(85100.0, 445000.0, 86000.0, 447000.0)),
        ],
    );
    Mock::given(method("GET"))
        .and(path("/AHN4_T/TILE_GONE.las"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fixture.server)
        .await;

    let output = fixture.output("centrum.las");
    let request = RunRequest::new(AreaOfInterest::NamedRegion("Centrum".into()), &output);

    match ahn_dl::run(&fixture.config(), &regions, &grid, request).await {
        Err(Error::TransferFailure { url, .. }) => assert!(url.ends_with("TILE_GONE.las")),
        other => panic!("expected TransferFailure, got {other:?}"),
    }
    assert!(!output.exists());
    assert!(files_in(fixture.out_dir.path()).is_empty());
    assert!(files_in(fixture.staging.path()).is_empty());
}

#[tokio::test]
async fn test_validation_errors_precede_network() {
    let fixture = Fixture::start().await;
    let (regions, grid) = tables();

    let mut overlap = centrum(fixture.output("a.las"));
    overlap.include_classes = BTreeSet::from([2, 6]);
    overlap.exclude_classes = BTreeSet::from([6]);

    let mut zero_step = centrum(fixture.output("b.las"));
    zero_step.decimate = Some(0);

    let unknown = RunRequest::new(
        AreaOfInterest::NamedRegion("Centrom".into()),
        fixture.output("c.las"),
    );

    let bad_box = RunRequest::new(
        AreaOfInterest::BoundingBox {
            bounds: [85000.0, 446000.0, 84000.0, 447000.0],
            epsg: 28992,
        },
        fixture.output("d.las"),
    );

    let config = fixture.config();
    assert!(matches!(
        ahn_dl::run(&config, &regions, &grid, overlap).await,
        Err(Error::InvalidConfiguration(_))
    ));
    assert!(matches!(
        ahn_dl::run(&config, &regions, &grid, zero_step).await,
        Err(Error::InvalidConfiguration(_))
    ));
    match ahn_dl::run(&config, &regions, &grid, unknown).await {
        Err(Error::RegionNotFound { suggestion, .. }) => {
            assert_eq!(suggestion.as_deref(), Some("Centrum"))
        }
        other => panic!("expected RegionNotFound, got {other:?}"),
    }
    assert!(matches!(
        ahn_dl::run(&config, &regions, &grid, bad_box).await,
        Err(Error::InvalidConfiguration(_))
    ));

    let bad_url = Config {
        base_url: "not a url".into(),
        ..fixture.config()
    };
    let request = centrum(fixture.output("e.las"));
    assert!(matches!(
        ahn_dl::run(&bad_url, &regions, &grid, request).await,
        Err(Error::InvalidUrl(_))
    ));

    assert!(fixture.server.received_requests().await.unwrap().is_empty());
    assert!(files_in(fixture.out_dir.path()).is_empty());
}

#[tokio::test]
async fn test_existing_output_is_not_overwritten() {
    let fixture = Fixture::start().await;
    let (regions, grid) = tables();
    let output = fixture.output("centrum.las");
    std::fs::write(&output, b"keep me").unwrap();

    let request = RunRequest::new(AreaOfInterest::NamedRegion("Centrum".into()), &output);
    assert!(matches!(
        ahn_dl::run(&fixture.config(), &regions, &grid, request).await,
        Err(Error::Io(_))
    ));
    assert_eq!(std::fs::read(&output).unwrap(), b"keep me");

    let mut forced = RunRequest::new(AreaOfInterest::NamedRegion("Centrum".into()), &output);
    forced.force = true;
    assert_eq!(
        ahn_dl::run(&fixture.config(), &regions, &grid, forced).await.unwrap(),
        4
    );
}

const REGIONS_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::28992" } },
    "features": [
        { "type": "Feature", "properties": { "name": "Centrum" },
          "geometry": { "type": "Polygon", "coordinates": [[[85000,446000],[85200,446000],[85200,446200],[85000,446200],[85000,446000]]] } }
    ]
}"#;

const TILES_GEOJSON: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "EPSG:28992" } },
    "features": [
        { "type": "Feature", "properties": { "AHN_subuni": "TILE_A" },
          "geometry": { "type": "Polygon", "coordinates": [[[84000,445000],[85100,445000],[85100,447000],[84000,447000],[84000,445000]]] } },
        { "type": "Feature", "properties": { "AHN_subuni": "TILE_B" },
          "geometry": { "type": "Polygon", "coordinates": [[[85100,445000],[86000,445000],[86000,447000],[85100,447000],[85100,445000]]] } }
    ]
}"#;

async fn run_cli(fixture: &Fixture, args: &[&str]) -> std::process::Output {
    let tables = fixture.out_dir.path().join("tables");
    std::fs::create_dir_all(&tables).unwrap();
    std::fs::write(tables.join("regions.geojson"), REGIONS_GEOJSON).unwrap();
    std::fs::write(tables.join("tiles.geojson"), TILES_GEOJSON).unwrap();

    tokio::process::Command::new(env!("CARGO_BIN_EXE_ahn-dl"))
        .arg("--regions")
        .arg(tables.join("regions.geojson"))
        .arg("--tiles")
        .arg(tables.join("tiles.geojson"))
        .arg("--base-url")
        .arg(format!("{}/AHN4_T/", fixture.server.uri()))
        .arg("--staging-dir")
        .arg(fixture.staging.path())
        .args(args)
        .output()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cli_end_to_end() {
    let fixture = Fixture::start().await;
    // The CLI asks for the default .LAZ extension; serve the same LAS bytes there.
    mount_tiles(&fixture.server, "LAZ").await;

    let output = fixture.output("centrum.las");
    let out = run_cli(&fixture, &["-c", "Centrum", "-i", "2", "-o", output.to_str().unwrap()])
        .await;
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let (header, _) = read_output(&output);
    assert_eq!(header.number_of_points(), 3);
    assert!(files_in(fixture.staging.path()).is_empty());

    // Second run refuses to overwrite.
    let out = run_cli(&fixture, &["-c", "Centrum", "-o", output.to_str().unwrap()]).await;
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
}

#[tokio::test]
async fn test_cli_rejects_unknown_class() {
    let fixture = Fixture::start().await;
    let output = fixture.output("x.las");
    let out = run_cli(&fixture, &["-c", "Centrum", "-i", "3", "-o", output.to_str().unwrap()])
        .await;
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not an AHN class"));
    assert!(fixture.server.received_requests().await.unwrap().is_empty());
}
