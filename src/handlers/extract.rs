use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` whose rejections are operational [`AppError`]s.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
