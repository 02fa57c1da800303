//! Integration tests for the loader and merger against a SQLite export
//!
//! Tests the complete merge path:
//! 1. Open the store and validate the configured layout
//! 2. Join compartments through the linking map
//! 3. Attach image strata and annotate with the plate map
//!
//! Toyota Way: Jidoka (Built-in Quality)

mod common;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use common::{nf1_fixture, CELLS, CELL_AREA, CYTOPLASM_ORDER, NUCLEI_AREA};
use indexmap::IndexMap;
use sc_features::config::{JoinOn, StoreConfig};
use sc_features::merge::SingleCells;
use sc_features::platemap::load_platemap;
use sc_features::storage::{open_store, MeasurementStore, MemoryStore};
use sc_features::table::{build_batch, column_names};
use sc_features::ErrorKind;
use std::io::Write;
use std::sync::{Arc, Mutex};

fn float_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a Float64Array {
    let index = batch.schema().index_of(name).unwrap();
    batch.column(index).as_any().downcast_ref::<Float64Array>().unwrap()
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int64Array {
    let index = batch.schema().index_of(name).unwrap();
    batch.column(index).as_any().downcast_ref::<Int64Array>().unwrap()
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
    let index = batch.schema().index_of(name).unwrap();
    batch.column(index).as_any().downcast_ref::<StringArray>().unwrap()
}

fn merged() -> RecordBatch {
    let fixture = nf1_fixture();
    let config = common::config(&fixture);
    let cells = SingleCells::from_config(&config.store).unwrap();
    let platemap = load_platemap(&config.platemap).unwrap();
    cells
        .merge_single_cells(&platemap, &config.platemap.join_on)
        .unwrap()
}

#[test]
fn test_plan_follows_linking_declaration_order() {
    let fixture = nf1_fixture();
    let config = common::config(&fixture);
    let cells = SingleCells::from_config(&config.store).unwrap();

    let plan = cells.plan();
    assert_eq!(plan.len(), 2);
    assert_eq!(
        (plan[0].left.as_str(), plan[0].right.as_str()),
        ("Per_Cytoplasm", "Per_Cells")
    );
    assert_eq!(plan[0].left_column, "Cytoplasm_Parent_Cells");
    assert_eq!(plan[0].right_column, "Cells_Number_Object_Number");
    assert_eq!(
        (plan[1].left.as_str(), plan[1].right.as_str()),
        ("Per_Cytoplasm", "Per_Nuclei")
    );
}

#[test]
fn test_one_row_per_cell() {
    let merged = merged();
    assert_eq!(merged.num_rows(), CELLS.len());
}

#[test]
fn test_linking_pairs_objects_not_rows() {
    let merged = merged();

    let image = int_column(&merged, "Metadata_ImageNumber");
    let object = int_column(&merged, "Metadata_Cells_Number_Object_Number");
    let parent = int_column(&merged, "Metadata_Cytoplasm_Parent_Cells");
    let cell_area = float_column(&merged, "Cells_AreaShape_Area");
    let cyto_area = float_column(&merged, "Cytoplasm_AreaShape_Area");
    let nuclei_area = float_column(&merged, "Nuclei_AreaShape_Area");

    for row in 0..merged.num_rows() {
        let cell = CELLS
            .iter()
            .position(|&c| c == (image.value(row), object.value(row)))
            .unwrap();
        assert_eq!(parent.value(row), object.value(row));
        assert_eq!(cell_area.value(row), CELL_AREA[cell]);
        assert_eq!(cyto_area.value(row), 2.0 * CELL_AREA[cell]);
        assert_eq!(nuclei_area.value(row), NUCLEI_AREA[cell]);
    }
}

#[test]
fn test_rows_follow_first_compartment_order() {
    let merged = merged();
    let image = int_column(&merged, "Metadata_ImageNumber");
    let object = int_column(&merged, "Metadata_Cells_Number_Object_Number");

    let order: Vec<(i64, i64)> = (0..merged.num_rows())
        .map(|row| (image.value(row), object.value(row)))
        .collect();
    let expected: Vec<(i64, i64)> = CYTOPLASM_ORDER.iter().map(|&i| CELLS[i]).collect();
    assert_eq!(order, expected);
}

#[test]
fn test_metadata_columns_lead_and_are_annotated() {
    let merged = merged();
    let names = column_names(&merged);

    let first_feature = names
        .iter()
        .position(|n| !n.starts_with("Metadata_"))
        .unwrap();
    assert!(names[first_feature..].iter().all(|n| !n.starts_with("Metadata_")));

    for expected in [
        "Metadata_genotype",
        "Metadata_seed_density",
        "Metadata_Well",
        "Metadata_Plate",
        "Metadata_ImageNumber",
        "Metadata_Cytoplasm_Parent_Cells",
        "Metadata_Cytoplasm_Parent_OrigNuclei",
        "Metadata_Cells_Number_Object_Number",
        "Metadata_Nuclei_Number_Object_Number",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
    assert!(!names.iter().any(|n| n == "ImageNumber"));
    assert!(!names.iter().any(|n| n.starts_with("Image_Metadata_")));
    assert!(!names.iter().any(|n| n == "Metadata_well_position"));
    assert_eq!(merged.num_columns(), 15);

    let image = int_column(&merged, "Metadata_ImageNumber");
    let well = string_column(&merged, "Metadata_Well");
    let genotype = string_column(&merged, "Metadata_genotype");
    for row in 0..merged.num_rows() {
        let (expected_well, expected_genotype) = if image.value(row) == 1 {
            ("C6", "WT")
        } else {
            ("D7", "NF1")
        };
        assert_eq!(well.value(row), expected_well);
        assert_eq!(genotype.value(row), expected_genotype);
    }
}

#[test]
fn test_memory_store_matches_sqlite_store() {
    let fixture = nf1_fixture();
    let config = common::config(&fixture);
    let platemap = load_platemap(&config.platemap).unwrap();

    let sqlite = open_store(&config.store.path).unwrap();
    let mut memory = MemoryStore::new();
    for table in sqlite.table_names().unwrap() {
        memory.insert(table.clone(), sqlite.read_table(&table).unwrap());
    }

    let from_sqlite = SingleCells::from_config(&config.store)
        .unwrap()
        .merge_single_cells(&platemap, &config.platemap.join_on)
        .unwrap();
    let from_memory = SingleCells::open(memory, &config.store)
        .unwrap()
        .merge_single_cells(&platemap, &config.platemap.join_on)
        .unwrap();
    assert_eq!(from_sqlite, from_memory);
}

#[test]
fn test_unknown_compartment_is_configuration_error() {
    let fixture = nf1_fixture();
    let mut config = common::config(&fixture);
    config.store.compartments.push("Per_Mito".to_string());

    let err = SingleCells::from_config(&config.store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("Per_Mito"));
}

#[test]
fn test_unknown_linking_column_is_configuration_error() {
    let fixture = nf1_fixture();
    let mut config = common::config(&fixture);
    config
        .store
        .linking
        .get_mut("Per_Cytoplasm")
        .unwrap()
        .insert("Per_Nuclei".to_string(), "Cytoplasm_Parent_Nuclei".to_string());

    let err = SingleCells::from_config(&config.store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("Cytoplasm_Parent_Nuclei"));
}

#[test]
fn test_unknown_stratum_is_configuration_error() {
    let fixture = nf1_fixture();
    let mut config = common::config(&fixture);
    config.store.strata.push("Image_Metadata_Site".to_string());

    let err = SingleCells::from_config(&config.store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_missing_store_is_io_error() {
    let fixture = nf1_fixture();
    let mut config = common::config(&fixture);
    config.store.path = fixture.dir.path().join("absent.sqlite").display().to_string();

    let err = SingleCells::from_config(&config.store).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_platemap_without_matching_wells_is_validation_error() {
    let fixture = nf1_fixture();
    std::fs::write(&fixture.platemap, "well_position,genotype\nH12,WT\n").unwrap();
    let config = common::config(&fixture);

    let cells = SingleCells::from_config(&config.store).unwrap();
    let platemap = load_platemap(&config.platemap).unwrap();
    let err = cells
        .merge_single_cells(&platemap, &config.platemap.join_on)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

/// Shared buffer collecting formatted log lines
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_orphan_rows_are_dropped_with_warning() {
    let fixture = nf1_fixture();
    let db = rusqlite::Connection::open(&fixture.sqlite).unwrap();
    db.execute("INSERT INTO Per_Cytoplasm VALUES (1, 9, 9, 1.0, 0.5)", [])
        .unwrap();
    drop(db);
    let config = common::config(&fixture);

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let merged = tracing::subscriber::with_default(subscriber, || {
        SingleCells::from_config(&config.store)
            .unwrap()
            .merge_compartments()
            .unwrap()
    });

    assert_eq!(merged.num_rows(), CELLS.len());
    let text = logs.text();
    assert!(text.contains("inner join dropped unmatched rows"), "{text}");
    assert!(text.contains("left_dropped=1"), "{text}");
    assert!(text.contains("right_dropped=0"), "{text}");
}

fn one_to_many_store() -> MemoryStore {
    let ints = |values: &[i64]| Arc::new(Int64Array::from(values.to_vec())) as ArrayRef;
    let image = build_batch(vec![
        ("ImageNumber".to_string(), ints(&[1])),
        (
            "Image_Metadata_Well".to_string(),
            Arc::new(StringArray::from(vec!["C6"])) as ArrayRef,
        ),
    ])
    .unwrap();
    let cells = build_batch(vec![
        ("ImageNumber".to_string(), ints(&[1, 1])),
        ("Cells_Number_Object_Number".to_string(), ints(&[1, 2])),
        (
            "Cells_AreaShape_Area".to_string(),
            Arc::new(Float64Array::from(vec![10.0, 20.0])) as ArrayRef,
        ),
    ])
    .unwrap();
    // Cell 1 holds two nuclei
    let nuclei = build_batch(vec![
        ("ImageNumber".to_string(), ints(&[1, 1, 1])),
        ("Nuclei_Parent_Cells".to_string(), ints(&[1, 1, 2])),
        (
            "Nuclei_AreaShape_Area".to_string(),
            Arc::new(Float64Array::from(vec![4.0, 3.0, 8.0])) as ArrayRef,
        ),
    ])
    .unwrap();
    MemoryStore::new()
        .with_table("Per_Image", image)
        .with_table("Per_Cells", cells)
        .with_table("Per_Nuclei", nuclei)
}

fn one_to_many_config(allow_one_to_many: bool) -> StoreConfig {
    let mut linking = IndexMap::new();
    linking.insert(
        "Per_Cells".to_string(),
        IndexMap::from([("Per_Nuclei".to_string(), "Cells_Number_Object_Number".to_string())]),
    );
    linking.insert(
        "Per_Nuclei".to_string(),
        IndexMap::from([("Per_Cells".to_string(), "Nuclei_Parent_Cells".to_string())]),
    );
    StoreConfig {
        path: String::new(),
        image_table: "Per_Image".to_string(),
        compartments: vec!["Per_Cells".to_string(), "Per_Nuclei".to_string()],
        merge_columns: vec!["ImageNumber".to_string()],
        strata: vec!["Image_Metadata_Well".to_string()],
        linking,
        allow_one_to_many,
        feature_prefixes: None,
    }
}

fn one_to_many_platemap() -> RecordBatch {
    build_batch(vec![
        (
            "well_position".to_string(),
            Arc::new(StringArray::from(vec!["C6", "D7"])) as ArrayRef,
        ),
        (
            "genotype".to_string(),
            Arc::new(StringArray::from(vec!["WT", "NF1"])) as ArrayRef,
        ),
    ])
    .unwrap()
}

#[test]
fn test_one_to_many_linkage_repeats_parent() {
    let cells = SingleCells::open(one_to_many_store(), &one_to_many_config(true)).unwrap();
    assert_eq!(cells.compartments(), &["Per_Cells", "Per_Nuclei"]);

    let join_on = JoinOn::new("Metadata_well_position", "Image_Metadata_Well");
    let merged = cells
        .merge_single_cells(&one_to_many_platemap(), &join_on)
        .unwrap();

    assert_eq!(merged.num_rows(), 3);
    let cell_area: Vec<f64> = float_column(&merged, "Cells_AreaShape_Area").values().to_vec();
    assert_eq!(cell_area, vec![10.0, 10.0, 20.0]);
    let nuclei_area: Vec<f64> = float_column(&merged, "Nuclei_AreaShape_Area").values().to_vec();
    assert_eq!(nuclei_area, vec![4.0, 3.0, 8.0]);
    let genotype = string_column(&merged, "Metadata_genotype");
    assert!((0..3).all(|i| genotype.value(i) == "WT"));
}

#[test]
fn test_one_to_many_linkage_rejected_by_default() {
    let cells = SingleCells::open(one_to_many_store(), &one_to_many_config(false)).unwrap();
    let err = cells.merge_compartments().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("one-to-one"));
}
