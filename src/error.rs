use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::StoreError;
use crate::utils::{ApiResponse, error_codes};

/// 错误分级：校验和鉴权错误在网关边界处理，存储/总线错误
/// 带操作上下文向上抛出，客户端只能看到通用文案。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("参数校验失败: {0}")]
    Validation(String),
    #[error("未授权访问")]
    Unauthorized,
    #[error("请求过于频繁")]
    RateLimited,
    #[error("记录不存在: {0}")]
    NotFound(String),
    #[error("存储服务不可用: {op} [{context}]")]
    StoreUnavailable {
        op: &'static str,
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("消息总线不可用: {0}")]
    BusUnavailable(String),
}

impl AppError {
    pub fn store(op: &'static str, context: impl Into<String>, source: StoreError) -> Self {
        AppError::StoreUnavailable {
            op,
            context: context.into(),
            source,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::Unauthorized => error_codes::AUTH_FAILED,
            AppError::RateLimited => error_codes::RATE_LIMIT,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::StoreUnavailable { .. } | AppError::BusUnavailable(_) => {
                error_codes::INTERNAL_ERROR
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StoreUnavailable { .. } | AppError::BusUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 对外的错误文案，内部细节只进日志
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::Unauthorized => "未授权访问".into(),
            AppError::RateLimited => "请求过于频繁，请稍后重试".into(),
            AppError::NotFound(_) => "记录不存在".into(),
            AppError::StoreUnavailable { .. } | AppError::BusUnavailable(_) => {
                "内部服务器错误，请稍后重试".into()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(
            self,
            AppError::StoreUnavailable { .. } | AppError::BusUnavailable(_)
        ) {
            tracing::error!(error = %self, "internal error surfaced to client");
        }
        let body = Json(ApiResponse::<()> {
            code: self.code(),
            msg: self.public_message(),
            resp_data: None,
        });
        (self.status(), body).into_response()
    }
}
