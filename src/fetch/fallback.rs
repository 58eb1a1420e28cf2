//! Synthesized responses for requests nothing else could serve.

use crate::request::ResponseSnapshot;

/// Minimal offline notice, served when a document request fails and not even
/// the root page is cached. Fixed RTL Arabic content, like the site itself.
pub const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="ar" dir="rtl">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>غير متصل - رولان آيس كريم</title>
    <style>
        body {
            font-family: Arial, sans-serif;
            text-align: center;
            padding: 50px;
            background: linear-gradient(135deg, #FF6B9D, #FF8A9B);
            color: white;
            min-height: 100vh;
            margin: 0;
            display: flex;
            align-items: center;
            justify-content: center;
            flex-direction: column;
        }
        .offline-icon { font-size: 4rem; margin-bottom: 20px; }
        h1 { margin-bottom: 20px; }
        .btn {
            background: white;
            color: #FF6B9D;
            padding: 15px 30px;
            border: none;
            border-radius: 25px;
            font-weight: bold;
            cursor: pointer;
            margin-top: 20px;
        }
    </style>
</head>
<body>
    <div class="offline-icon">📱</div>
    <h1>أنت غير متصل بالإنترنت</h1>
    <p>يرجى التحقق من اتصالك بالإنترنت والمحاولة مرة أخرى</p>
    <button class="btn" onclick="window.location.reload()">إعادة المحاولة</button>
</body>
</html>
"#;

/// The offline notice as a renderable 200 response.
pub fn offline_page() -> ResponseSnapshot {
  ResponseSnapshot::new(
    200,
    vec![(
      "content-type".to_string(),
      "text/html; charset=utf-8".to_string(),
    )],
    OFFLINE_PAGE.as_bytes().to_vec(),
  )
}

/// Short error response for failed non-document requests.
pub fn network_error() -> ResponseSnapshot {
  ResponseSnapshot::new(
    408,
    vec![("content-type".to_string(), "text/plain".to_string())],
    b"Network error".to_vec(),
  )
}
