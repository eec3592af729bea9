use thiserror::Error;

/// 导入流程中需要按类别处理的失败。行级错误只作为文本收集在结果里。
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("打开文件失败 ({path}): {message}")]
    FileOpen { path: String, message: String },

    #[error("读取 Sheet 失败 ({sheet}): {message}")]
    SheetRead { sheet: String, message: String },

    #[error("无法识别数据年月 ({sheet})")]
    UnresolvedPeriod { sheet: String },

    #[error("存储操作失败: {0}")]
    Store(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NoData(String),
}

impl ImportError {
    pub fn category(&self) -> &'static str {
        match self {
            ImportError::FileOpen { .. } => "FILE_OPEN_ERROR",
            ImportError::SheetRead { .. } => "SHEET_READ_ERROR",
            ImportError::UnresolvedPeriod { .. } => "UNRESOLVED_PERIOD",
            ImportError::Store(_) => "STORE_ERROR",
            ImportError::Validation(_) => "VALIDATION_ERROR",
            ImportError::NoData(_) => "NO_DATA_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_sheet() {
        let err = ImportError::UnresolvedPeriod {
            sheet: "批发".to_string(),
        };
        assert!(err.to_string().contains("批发"));
        assert_eq!(err.category(), "UNRESOLVED_PERIOD");
    }

    #[test]
    fn request_level_errors_keep_their_message() {
        let err = ImportError::Validation("年月不合法: 2025-13".to_string());
        assert_eq!(err.to_string(), "年月不合法: 2025-13");
        assert_eq!(err.category(), "VALIDATION_ERROR");
        assert_eq!(
            ImportError::NoData("未设置当前年月".to_string()).category(),
            "NO_DATA_ERROR"
        );
        assert_eq!(ImportError::Store("x".to_string()).category(), "STORE_ERROR");
    }
}
