use serde_json::{Map, Value};

use crate::dataset::Dataset;

/// Serializa el dataset como CSV UTF-8: encabezados + una línea por fila,
/// sin columna de índice. Null se escribe como campo vacío.
pub fn to_csv_bytes(dataset: &Dataset) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(dataset.columns())?;
    for row in dataset.rows() {
        writer.write_record(row.cells().iter().map(|v| v.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Un objeto JSON por fila (columna -> valor), para el destino `database`.
pub fn to_records(dataset: &Dataset) -> Vec<Map<String, Value>> {
    dataset.rows().map(|row| row.to_json_map()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Scalar;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::new(
            vec!["id".into(), "name".into(), "score".into()],
            vec![
                vec![Scalar::Int(2), "Bob".into(), Scalar::Float(1.5)],
                vec![Scalar::Int(3), "Smith, J".into(), Scalar::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn to_csv_bytes_escribe_encabezado_y_filas_sin_indice() {
        let bytes = to_csv_bytes(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "id,name,score\n2,Bob,1.5\n3,\"Smith, J\",\n");
    }

    #[test]
    fn to_csv_bytes_de_dataset_sin_filas_deja_solo_encabezado() {
        let ds = Dataset::new(vec!["a".into(), "b".into()], vec![]).unwrap();
        let text = String::from_utf8(to_csv_bytes(&ds).unwrap()).unwrap();
        assert_eq!(text, "a,b\n");
    }

    #[test]
    fn to_records_genera_un_objeto_por_fila() {
        let records = to_records(&sample());
        assert_eq!(records.len(), 2);
        assert_eq!(
            Value::Object(records[1].clone()),
            json!({"id": 3, "name": "Smith, J", "score": null})
        );
    }
}
