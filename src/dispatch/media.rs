//! Music playback on the phone: in-app video search with a web fallback

/// Video app preferred for phone playback
pub const VIDEO_APP_ID: &str = "com.google.android.youtube";

/// Web search for `query` when the video app is unavailable
pub fn web_search_url(query: &str) -> String {
    format!(
        "https://www.youtube.com/results?search_query={}",
        urlencoding::encode(query.trim())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_search_url_encodes_query() {
        assert_eq!(
            web_search_url(" Bohemian Rhapsody & more "),
            "https://www.youtube.com/results?search_query=Bohemian%20Rhapsody%20%26%20more"
        );
    }
}
