//! Liberty configuration fragments shared by the LTPA, encryption and trace dropins.

/// Escape a value for use inside a double-quoted XML attribute
pub fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `${server.output.dir}` location of a file mounted under `/output`
pub fn output_dir_location(mount_path: &str, file: &str) -> String {
    let relative = mount_path.strip_prefix("/output").unwrap_or(mount_path);
    format!("${{server.output.dir}}{relative}/{file}")
}

/// Dropin including another configuration file
pub fn include_xml(location: &str) -> String {
    format!(
        "<server>\n  <include location=\"{}\"/>\n</server>\n",
        escape_attr(location)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr(r#"a&b<"c">'"#), "a&amp;b&lt;&quot;c&quot;&gt;&apos;");
        assert_eq!(escape_attr("*=info:com.ibm.ws.*=all"), "*=info:com.ibm.ws.*=all");
    }

    #[test]
    fn test_include_output_dir() {
        let location = output_dir_location("/output/liberty-operator/ltpa", "ltpaKeysMount.xml");
        assert_eq!(location, "${server.output.dir}/liberty-operator/ltpa/ltpaKeysMount.xml");
        assert_eq!(
            include_xml(&location),
            "<server>\n  <include location=\"${server.output.dir}/liberty-operator/ltpa/ltpaKeysMount.xml\"/>\n</server>\n"
        );
    }
}
