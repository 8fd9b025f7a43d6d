//! CSV export of the session history.

use chrono::{DateTime, Utc};
use tonality_core::persistence::SessionRecord;

pub const CSV_HEADER: &str = "ID,Data,Nome,Nivel,Pontos,Resultado";

/// Renders records as CSV, one line per record in the given order.
pub fn render_csv(records: &[SessionRecord]) -> String {
    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for record in records {
        lines.push(format!(
            "{},{},{},{},{},{}",
            record.id.map(|id| id.to_string()).unwrap_or_default(),
            quote(&record.created_at.map(format_date).unwrap_or_default()),
            quote(&record.player_name),
            record.level,
            record.score,
            quote(&record.result),
        ));
    }
    lines.join("\n")
}

/// File name offered for the download, stamped with the export date.
pub fn file_name(now: DateTime<Utc>) -> String {
    format!("relatorio_sessoes_{}.csv", now.format("%Y-%m-%d"))
}

fn format_date(at: DateTime<Utc>) -> String {
    at.format("%d/%m/%Y, %H:%M:%S").to_string()
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tonality_core::session::Level;

    fn record(id: Option<i64>, name: &str, result: &str) -> SessionRecord {
        SessionRecord {
            id,
            player_name: name.to_string(),
            level: Level::Investigador,
            score: 110,
            result: result.to_string(),
            created_at: Some(Utc.with_ymd_and_hms(2026, 10, 17, 9, 5, 3).unwrap()),
        }
    }

    #[test]
    fn test_render_csv() {
        let csv = render_csv(&[
            record(Some(2), "Ana", "Vitória"),
            record(None, "Silva, \"Bia\"", "Derrota"),
        ]);
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "2,\"17/10/2026, 09:05:03\",Ana,Investigador,110,Vitória");
        assert_eq!(
            lines[2],
            ",\"17/10/2026, 09:05:03\",\"Silva, \"\"Bia\"\"\",Investigador,110,Derrota"
        );
    }

    #[test]
    fn test_empty_history_is_header_only() {
        assert_eq!(render_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn test_file_name() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 23, 59, 0).unwrap();
        assert_eq!(file_name(now), "relatorio_sessoes_2026-10-17.csv");
    }
}
