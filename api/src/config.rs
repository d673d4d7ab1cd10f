use std::env;

const DEFAULT_EMAIL_SUFFIXES: &[&str] = &[".edu", ".edu.in", ".ac.in"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    /// アップロード画像の公開URLの基点（末尾スラッシュなし）
    pub media_public_base_url: String,
    /// サインインを許可するメールアドレスの接尾辞（小文字）
    pub allowed_email_suffixes: Vec<String>,
    /// IDトークン検証エンドポイント（Google互換の tokeninfo）
    pub identity_tokeninfo_url: String,
    /// 設定されていれば IDトークンの `aud` と一致することを要求する
    pub identity_audience: Option<String>,
    pub session_ttl_hours: i64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let s3_bucket = env::var("S3_BUCKET").unwrap_or_else(|_| "campushop".into());
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:campushop.db?mode=rwc".into()),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "auto".into()),
            media_public_base_url: env::var("MEDIA_PUBLIC_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| format!("https://{s3_bucket}.s3.amazonaws.com")),
            s3_bucket,
            allowed_email_suffixes: env::var("ALLOWED_EMAIL_SUFFIXES")
                .map(|v| parse_suffixes(&v))
                .unwrap_or_else(|_| default_email_suffixes()),
            identity_tokeninfo_url: env::var("IDENTITY_TOKENINFO_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/tokeninfo".into()),
            identity_audience: env::var("IDENTITY_AUDIENCE").ok(),
            session_ttl_hours: env::var("SESSION_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24 * 30),
        }
    }
}

pub fn default_email_suffixes() -> Vec<String> {
    DEFAULT_EMAIL_SUFFIXES.iter().map(|s| s.to_string()).collect()
}

/// カンマ区切りの接尾辞リストを正規化する。先頭ドットがなければ補う。
fn parse_suffixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_suffixes_normalizes_entries() {
        assert_eq!(
            parse_suffixes(" .EDU, ac.in ,,edu.in"),
            vec![".edu".to_string(), ".ac.in".to_string(), ".edu.in".to_string()]
        );
    }

    #[test]
    fn default_suffixes_cover_indian_and_us_domains() {
        let suffixes = default_email_suffixes();
        assert!(suffixes.contains(&".edu".to_string()));
        assert!(suffixes.contains(&".edu.in".to_string()));
        assert!(suffixes.contains(&".ac.in".to_string()));
    }
}
