//! 远端站点的 URL 布局与页面分类

use std::sync::LazyLock;

use regex::Regex;

/// 登录/认证相关路径段
static AUTH_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(login|authn)(?:[/?#.-]|$)").expect("静态正则"));

/// 当前 URL 对应的页面类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// 导出页面
    Export,
    /// 登录或认证页面
    Login,
    /// 账户首页（已登录）
    Home,
    /// 其他页面
    Other,
}

/// 站点 URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteUrls {
    base_url: String,
    export_path: String,
}

impl SiteUrls {
    pub fn new(base_url: &str, export_path: &str) -> Self {
        let export_path = if export_path.starts_with('/') {
            export_path.to_string()
        } else {
            format!("/{}", export_path)
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            export_path,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn export_url(&self) -> String {
        format!("{}{}", self.base_url, self.export_path)
    }

    pub fn login_url(&self) -> String {
        format!("{}/login", self.base_url)
    }

    /// 是否在本站点内
    pub fn is_on_site(&self, url: &str) -> bool {
        url.starts_with(&self.base_url)
    }

    /// URL 路径是否包含登录/认证路径段（不看查询参数）
    pub fn is_auth_url(&self, url: &str) -> bool {
        AUTH_PATH.is_match(url_path(url))
    }

    /// URL 路径是否就是导出页面
    fn is_export_url(&self, url: &str) -> bool {
        self.is_on_site(url)
            && url_path(url).trim_end_matches('/') == self.export_path.trim_end_matches('/')
    }

    /// 已登录：停留在账户首页且没有登录路径段
    pub fn is_authenticated_url(&self, url: &str) -> bool {
        url.trim_end_matches('/') == self.base_url && !self.is_auth_url(url)
    }

    pub fn classify(&self, url: &str) -> PageKind {
        if self.is_auth_url(url) {
            PageKind::Login
        } else if self.is_export_url(url) {
            PageKind::Export
        } else if self.is_authenticated_url(url) {
            PageKind::Home
        } else {
            PageKind::Other
        }
    }
}

/// 去掉 scheme、主机、查询参数和片段，只留路径
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);
    rest.find('/').map_or("/", |i| &rest[i..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteUrls {
        SiteUrls::new("https://account.example.com/", "data-export")
    }

    #[test]
    fn test_urls() {
        let s = site();
        assert_eq!(s.base_url(), "https://account.example.com");
        assert_eq!(s.export_url(), "https://account.example.com/data-export");
        assert_eq!(s.login_url(), "https://account.example.com/login");
    }

    #[test]
    fn test_classify() {
        let s = site();
        assert_eq!(s.classify("https://account.example.com/data-export"), PageKind::Export);
        assert_eq!(s.classify("https://account.example.com/data-export/"), PageKind::Export);
        assert_eq!(s.classify("https://account.example.com/login"), PageKind::Login);
        assert_eq!(
            s.classify("https://id.example.com/authn/otp?state=x"),
            PageKind::Login
        );
        assert_eq!(s.classify("https://account.example.com/"), PageKind::Home);
        assert_eq!(s.classify("https://account.example.com/settings"), PageKind::Other);
        assert_eq!(s.classify("about:blank"), PageKind::Other);
        assert_eq!(
            s.classify("https://account.example.com/data-export?tab=history#top"),
            PageKind::Export
        );
    }

    #[test]
    fn test_login_redirect_carrying_export_path_is_login() {
        let s = site();
        assert_eq!(
            s.classify("https://account.example.com/login?next=/data-export"),
            PageKind::Login
        );
        assert_eq!(
            s.classify("https://account.example.com/authn/otp?return_to=https%3A%2F%2Faccount.example.com%2Fdata-export"),
            PageKind::Login
        );
        assert_eq!(
            s.classify("https://account.example.com/settings?from=/data-export"),
            PageKind::Other
        );
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("https://account.example.com/data-export?x=1"), "/data-export");
        assert_eq!(url_path("https://account.example.com"), "/");
        assert_eq!(url_path("https://account.example.com?next=/login"), "/");
        assert_eq!(url_path("about:blank"), "/");
    }

    #[test]
    fn test_authenticated_only_on_bare_home() {
        let s = site();
        assert!(s.is_authenticated_url("https://account.example.com"));
        assert!(s.is_authenticated_url("https://account.example.com/"));
        assert!(!s.is_authenticated_url("https://account.example.com/login"));
        assert!(!s.is_authenticated_url("https://account.example.com/data-export"));
    }

    #[test]
    fn test_auth_segment_is_not_a_substring_match() {
        let s = site();
        assert!(!s.is_auth_url("https://account.example.com/loginhistory-report"));
        assert!(s.is_auth_url("https://account.example.com/login?next=/"));
        assert!(!s.is_auth_url("https://account.example.com/data-export?from=/login"));
    }
}
