use ruc_registry::dataset;
use ruc_registry::lookup::{self, LookupEngine, LookupOutcome};
use ruc_registry::progress::{channel_sink, Phase};
use ruc_registry::store::RegistryStore;
use ruc_registry::{build_registry, RegistryConfig, Silent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::mpsc;
use tempfile::TempDir;

/// Raw extract in the public layout: Latin-1, trailing delimiter, extra
/// columns, one truncated record
fn write_raw_extract(path: &Path) {
    let mut raw = Vec::new();
    raw.extend_from_slice(b"RUC|NOMBRE O RAZON SOCIAL|ESTADO DEL CONTRIBUYENTE|CONDICION DE DOMICILIO|UBIGEO|\r\n");
    raw.extend_from_slice(b"20123456789|ACME|ACTIVO|HABIDO|150101|\r\n");
    raw.extend_from_slice(b"10123456781|PE\xD1A QUISPE JUAN|ACTIVO|HABIDO|150101|\r\n");
    raw.extend_from_slice(b"10456789019|ROJAS ANA|BAJA DE OFICIO|NO HALLADO|-|\r\n");
    raw.extend_from_slice(b"20999999999|TRUNCADA\r\n");
    raw.extend_from_slice(b"-|SIN NUMERO|ACTIVO|HABIDO|-|\r\n");
    std::fs::write(path, raw).unwrap();
}

fn build(temp_dir: &TempDir) -> std::path::PathBuf {
    let raw = temp_dir.path().join("padron_reducido_ruc.txt");
    let dest = temp_dir.path().join("data").join("padron.db");
    write_raw_extract(&raw);
    let report = build_registry(&raw, &dest, &RegistryConfig::default(), &mut Silent).unwrap();
    assert_eq!(report.sanitize.dropped_lines, vec![4]);
    assert_eq!(report.load.rows, 4);
    assert_eq!(report.load.sentinel_rows, 1);
    dest
}

#[test]
fn test_build_then_resolve_table() {
    let temp_dir = TempDir::new().unwrap();
    let dest = build(&temp_dir);
    let config = RegistryConfig::default();

    let input = temp_dir.path().join("clientes.csv");
    std::fs::write(
        &input,
        "Cliente,Documento\nacme,20123456789\nperez,10123456780\nrojas,45678901\nnadie,99000000000\nmal,1012345678i\n,\n",
    )
    .unwrap();

    let store = RegistryStore::open(&dest, &config.table_name, &config.identifier_column).unwrap();
    let values = lookup::read_identifier_column(&input, &config.input_column).unwrap();
    let results = LookupEngine::from_config(&store, &config).unwrap().resolve_quiet(&values).unwrap();
    assert_eq!(results.len(), 6);

    let output = lookup::default_output_path(&input);
    lookup::write_results(&output, &results).unwrap();
    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();

    assert_eq!(lines.len(), 7);
    assert!(lines[1].starts_with("20123456789,"));
    assert!(lines[1].ends_with("ACME,ACTIVO,HABIDO"));
    assert_eq!(lines[2], "10123456780,10123456781,PEÑA QUISPE JUAN,ACTIVO,HABIDO");
    assert_eq!(lines[3], "45678901,10456789019,ROJAS ANA,BAJA DE OFICIO,NO HALLADO");
    assert_eq!(lines[4], "99000000000,99000000007,-,NOT FOUND,-");
    assert_eq!(lines[5], "1012345678i,-,-,INVALID,-");
    assert_eq!(lines[6], ",-,-,INVALID,-");
}

#[test]
fn test_resolve_from_json_preserves_order_and_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let dest = build(&temp_dir);

    let input = temp_dir.path().join("clientes.json");
    std::fs::write(
        &input,
        r#"[{"Documento": 10123456781}, {"Documento": "x"}, {"Documento": 10123456781}, {"Documento": null}]"#,
    )
    .unwrap();

    let store = RegistryStore::open(&dest, "padron", "RUC").unwrap();
    let values = lookup::read_identifier_column(&input, "documento").unwrap();
    let results = lookup::resolve(&values, &store, 1).unwrap();

    assert_eq!(results.len(), 4);
    assert!(results[0].is_found());
    assert_eq!(results[1].outcome, LookupOutcome::Invalid);
    assert_eq!(results[2], results[0]);
    assert_eq!(results[3].outcome, LookupOutcome::Invalid);
}

#[test]
fn test_progress_over_a_channel() {
    let temp_dir = TempDir::new().unwrap();
    let raw = temp_dir.path().join("padron.txt");
    let dest = temp_dir.path().join("padron.db");
    write_raw_extract(&raw);

    let (tx, rx) = mpsc::channel();
    let worker = std::thread::spawn(move || {
        let mut sink = channel_sink(tx);
        build_registry(&raw, &dest, &RegistryConfig::default(), &mut sink).map(|r| r.load.rows)
    });

    let events: Vec<_> = rx.iter().collect();
    assert_eq!(worker.join().unwrap().unwrap(), 4);
    for phase in [Phase::Sanitizing, Phase::Loading, Phase::Indexing] {
        let last = events.iter().filter(|p| p.phase == phase).last().unwrap();
        assert_eq!(last.fraction, 1.0);
    }
}

#[test]
fn test_generated_stress_dataset_resolves() {
    let temp_dir = TempDir::new().unwrap();
    let dest = build(&temp_dir);
    let store = RegistryStore::open(&dest, "padron", "ruc").unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    let normal = dataset::normal_dataset(&store, 10, &mut rng).unwrap();
    // Only three usable identifiers exist
    assert_eq!(normal.len(), 3);

    let stress = dataset::stress_dataset(normal, 1.0, &mut rng).unwrap();
    let path = dataset::stress_dataset_path(temp_dir.path(), 3);
    dataset::write_dataset_csv(&path, &stress).unwrap();

    let values = lookup::read_identifier_column(&path, "Documento").unwrap();
    let results = lookup::resolve(&values, &store, 900).unwrap();
    assert_eq!(results.len(), 3);
}
