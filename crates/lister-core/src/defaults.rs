//! Embedded page template and stylesheet used when no custom body or
//! style file is configured.

pub const DEFAULT_BODY: &str = r#"<!DOCTYPE HTML>
<html>
    <head>
        <meta charset="UTF-8" />
        <title>$CURRENT_DIRECTORY</title>
        $CSS
        $JS
    </head>
    <body>
        <div id="content" class="container">
            {{ if error }}
                $ERROR_MESSAGE
            {{ endif }}
            {{ if no error }}
                <table>
                    <thead>
                        <tr>
                            <th colspan="4" class="th-title">
                                <h2>$CURRENT_DIRECTORY</h2>
                            </th>
                        </tr>
                        <tr>
                            <th class=""><a href="$TOGGLE_SORTING_NAME">File</a></th>
                            <th><a href="$TOGGLE_SORTING_SIZE">Size</a></th>
                            <th class="nowrap"><a href="$TOGGLE_SORTING_MODIFICATION">Date Modified</a></th>
                            <th></th>
                        </tr>
                    </thead>
                    <tbody>
                        {{ loop }}
                            <tr>
                                <td class="full-width"><a href="$FILE_LINK">
                                    {{ if not file }}
                                        $FILE_NAME/
                                    {{ endif not file }}
                                    {{ if file }}
                                        $FILE_NAME
                                    {{ endif file }}
                                </a></td>
                                <td>$FILE_SIZE</td>
                                <td class="nowrap">$FILE_MODIFICATION</td>
                                {{ if file }}
                                    <td class="nowrap">
                                        <a class="more" href="$FILE_LINK?hashes" target="_blank">
                                            (+)
                                        </a>
                                    </td>
                                {{ endif file }}
                                {{ if not file }}
                                    <td class="nowrap"></td>
                                {{ endif not file }}
                            </tr>
                        {{ endloop }}
                    </tbody>
                </table>
            {{ endif }}
        </div>
    </body>
</html>
"#;

pub const DEFAULT_CSS: &str = r#"h2 {
    font-size: 150%;
    margin: 0;
    font-weight: 700;
    font-family: "Roboto Slab","ff-tisa-web-pro","Georgia",Arial,sans-serif;
}
#content {
    padding-bottom: 100px;
    max-width: 1080px;
    margin: 0 auto;
}
.th-title {
    background: rgba(0, 0, 0, 0.1) none repeat scroll 0% 0%;
}
.full-width { width: 100% }
.nowrap { white-space: nowrap}
.more { color: #787878 }
tr {
    border: 1px solid #DDD;
}
tbody tr:hover {
    background-color: rgba(0,0,0,0.1);
}
td {
    vertical-align: top;
}
table {
    margin: 0 auto;
    border-collapse: collapse;
    border-spacing: 0;
}
table th {
    font-weight: bold;
}
table th, table td {
    padding: 6px 13px;
}
a { text-decoration: none; color: #0063c6 }
a:hover { color: #02417f }
"#;

pub const DEFAULT_JS: &str = "";
