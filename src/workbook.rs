use crate::normalize::{is_blank_cell, trim_cell};
use calamine::{open_workbook_auto, Reader};
use sha1::{Digest, Sha1};
use std::path::Path;

/// 一张 Sheet 的表头与数据行，单元格均已修剪。
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    /// 第一行非空行作为表头。全空的 Sheet 返回 None。
    pub fn from_grid(name: &str, grid: Vec<Vec<String>>) -> Option<Self> {
        let mut rows = grid.into_iter().skip_while(|row| row.iter().all(|c| is_blank_cell(c)));
        let header = rows.next()?;
        Some(Self {
            name: name.to_string(),
            header,
            rows: rows.collect(),
        })
    }

    /// 前 `limit` 行数据。
    pub fn preview_rows(&self, limit: usize) -> &[Vec<String>] {
        &self.rows[..self.rows.len().min(limit)]
    }
}

/// 可以按 Sheet 名读取单元格文本的工作簿。
pub trait WorkbookSource: Send {
    fn file_name(&self) -> &str;
    fn sheet_names(&self) -> Vec<String>;
    fn read_sheet(&mut self, name: &str) -> Result<Vec<Vec<String>>, String>;

    fn file_size(&self) -> Option<u64> {
        None
    }

    fn fingerprint(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    file_name: String,
    sheets: Vec<(String, Result<Vec<Vec<String>>, String>)>,
}

impl InMemoryWorkbook {
    pub fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            sheets: Vec::new(),
        }
    }

    pub fn with_sheet(mut self, name: &str, rows: &[&[&str]]) -> Self {
        let grid = rows
            .iter()
            .map(|row| row.iter().map(|c| trim_cell(c)).collect())
            .collect();
        self.sheets.push((name.to_string(), Ok(grid)));
        self
    }

    /// 读取时返回错误的 Sheet。
    pub fn with_unreadable_sheet(mut self, name: &str, message: &str) -> Self {
        self.sheets.push((name.to_string(), Err(message.to_string())));
        self
    }
}

impl WorkbookSource for InMemoryWorkbook {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Vec<Vec<String>>, String> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, grid)| grid.clone())
            .unwrap_or_else(|| Err(format!("未找到工作表: {name}")))
    }
}

/// xlsx/xls/ods 工作簿。打开时一次读出所有 Sheet，单张 Sheet 的读取失败保留到 `read_sheet` 再报告。
pub struct CalamineWorkbook {
    file_name: String,
    file_size: Option<u64>,
    fingerprint: Option<String>,
    sheets: Vec<(String, Result<Vec<Vec<String>>, String>)>,
}

impl CalamineWorkbook {
    pub fn open(path: &Path) -> Result<Self, String> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| format!("打开工作簿失败: {e}"))?;
        let sheet_names = workbook.sheet_names().to_owned();
        let mut sheets = Vec::with_capacity(sheet_names.len());
        for name in sheet_names {
            let grid = workbook
                .worksheet_range(&name)
                .map(|range| {
                    range
                        .rows()
                        .map(|row| {
                            row.iter()
                                .map(|cell| trim_cell(&cell.to_string()))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                })
                .map_err(|e| format!("读取工作表失败: {e}"));
            sheets.push((name, grid));
        }
        Ok(Self {
            file_name: display_file_name(path),
            file_size: std::fs::metadata(path).ok().map(|m| m.len()),
            fingerprint: file_fingerprint(path).ok(),
            sheets,
        })
    }
}

impl WorkbookSource for CalamineWorkbook {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn read_sheet(&mut self, name: &str) -> Result<Vec<Vec<String>>, String> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, grid)| grid.clone())
            .unwrap_or_else(|| Err(format!("未找到工作表: {name}")))
    }

    fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    fn fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}

/// 单表 CSV，Sheet 名取文件名（不含扩展名）。
pub struct CsvWorkbook {
    file_name: String,
    sheet_name: String,
    file_size: Option<u64>,
    fingerprint: Option<String>,
    rows: Vec<Vec<String>>,
}

impl CsvWorkbook {
    pub fn open(path: &Path) -> Result<Self, String> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| format!("读取 CSV 失败: {e}"))?;

        let mut rows = Vec::new();
        for rec in reader.records() {
            let rec = rec.map_err(|e| format!("读取 CSV 行失败: {e}"))?;
            rows.push(rec.iter().map(trim_cell).collect());
        }
        let sheet_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Sheet1")
            .to_string();
        Ok(Self {
            file_name: display_file_name(path),
            sheet_name,
            file_size: std::fs::metadata(path).ok().map(|m| m.len()),
            fingerprint: file_fingerprint(path).ok(),
            rows,
        })
    }
}

impl WorkbookSource for CsvWorkbook {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    fn sheet_names(&self) -> Vec<String> {
        vec![self.sheet_name.clone()]
    }

    fn read_sheet(&mut self, name: &str) -> Result<Vec<Vec<String>>, String> {
        if name == self.sheet_name {
            Ok(self.rows.clone())
        } else {
            Err(format!("未找到工作表: {name}"))
        }
    }

    fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    fn fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// 文件内容的 sha1，用于导入日志去重。
pub fn file_fingerprint(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("读取文件失败: {e}"))?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// 按扩展名打开工作簿。
pub fn open_workbook(path: &Path) -> Result<Box<dyn WorkbookSource>, String> {
    if !path.exists() {
        return Err(format!("未找到导入文件: {}", path.to_string_lossy()));
    }
    if !path.is_file() {
        return Err(format!("导入路径不是文件: {}", path.to_string_lossy()));
    }

    let suffix = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match suffix.as_str() {
        "csv" => Ok(Box::new(CsvWorkbook::open(path)?)),
        "xlsx" | "xlsm" | "xls" | "ods" => Ok(Box::new(CalamineWorkbook::open(path)?)),
        _ => Err(format!(
            "不支持的文件格式: .{suffix}（仅支持 .xlsx/.xls/.ods/.csv）"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "survey_ingest_workbook_test_{}_{}.{ext}",
            std::process::id(),
            Uuid::new_v4()
        ))
    }

    #[test]
    fn raw_sheet_skips_leading_blank_rows() {
        let grid = vec![
            vec!["".to_string(), "".to_string()],
            vec!["单位详细名称".to_string(), "2025年12月销售额".to_string()],
            vec!["甲".to_string(), "100".to_string()],
        ];
        let sheet = RawSheet::from_grid("批发", grid).expect("non-empty sheet");
        assert_eq!(sheet.header[0], "单位详细名称");
        assert_eq!(sheet.rows.len(), 1);
        assert!(RawSheet::from_grid("空", vec![vec![String::new()]]).is_none());
    }

    #[test]
    fn in_memory_workbook_reports_unreadable_sheet() {
        let mut wb = InMemoryWorkbook::new("mem.xlsx")
            .with_sheet("批发", &[&["单位详细名称"]])
            .with_unreadable_sheet("坏表", "corrupted");
        assert_eq!(wb.sheet_names(), vec!["批发".to_string(), "坏表".to_string()]);
        assert!(wb.read_sheet("批发").is_ok());
        assert_eq!(wb.read_sheet("坏表"), Err("corrupted".to_string()));
        assert!(wb.read_sheet("不存在").is_err());
    }

    #[test]
    fn csv_workbook_uses_file_stem_as_sheet_name() {
        let path = temp_path("csv");
        std::fs::write(&path, "单位详细名称,2025年12月销售额\n 甲 ,100\n").expect("write csv");
        let mut wb = open_workbook(&path).expect("open csv");
        let names = wb.sheet_names();
        assert_eq!(names.len(), 1);
        let rows = wb.read_sheet(&names[0]).expect("read csv");
        assert_eq!(rows[1], vec!["甲".to_string(), "100".to_string()]);
        assert_eq!(wb.fingerprint().map(|f| f.len()), Some(40));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_missing_and_unsupported_files() {
        assert!(open_workbook(&temp_path("xlsx")).is_err());
        let path = temp_path("txt");
        std::fs::write(&path, "x").expect("write txt");
        let err = open_workbook(&path).err().expect("unsupported format");
        assert!(err.contains("不支持的文件格式"));
        let _ = std::fs::remove_file(&path);
    }
}
