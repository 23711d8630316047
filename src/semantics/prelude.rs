//! The built-in `java.lang`/`java.io` sources compiled into every program.
//!
//! The runtime ABI only supplies `__malloc`, `__exception`, `__debexit`,
//! and the native byte writer, so everything else — `Object` defaulting,
//! string concatenation, integer formatting — is ordinary Joos code that
//! goes through the same pipeline as user sources. A user declaration with
//! the same canonical name shadows the corresponding prelude unit.

/// The prelude units as `(file name, source text)` pairs, in the order they
/// are appended to a compilation.
#[must_use]
pub fn units() -> &'static [(&'static str, &'static str)] {
    &[
        ("Object.java", OBJECT),
        ("String.java", STRING),
        ("System.java", SYSTEM),
        ("OutputStream.java", OUTPUT_STREAM),
    ]
}

const OBJECT: &str = r#"
package java.lang;

public class Object {
    public Object() {}

    public boolean equals(Object other) {
        return this == other;
    }

    public int hashCode() {
        return 0;
    }

    public String toString() {
        return "Object";
    }
}
"#;

const STRING: &str = r#"
package java.lang;

public class String {
    public char[] chars;

    public String() {
        chars = new char[0];
    }

    public String(char[] source) {
        chars = new char[source.length];
        for (int i = 0; i < source.length; i = i + 1) {
            chars[i] = source[i];
        }
    }

    public int length() {
        return chars.length;
    }

    public char charAt(int index) {
        return chars[index];
    }

    public String concat(String other) {
        char[] merged = new char[chars.length + other.chars.length];
        for (int i = 0; i < chars.length; i = i + 1) {
            merged[i] = chars[i];
        }
        for (int j = 0; j < other.chars.length; j = j + 1) {
            merged[chars.length + j] = other.chars[j];
        }
        return new String(merged);
    }

    public boolean equals(Object other) {
        if (!(other instanceof String)) {
            return false;
        }
        String text = (String) other;
        if (text.chars.length != chars.length) {
            return false;
        }
        for (int i = 0; i < chars.length; i = i + 1) {
            if (chars[i] != text.chars[i]) {
                return false;
            }
        }
        return true;
    }

    public int hashCode() {
        int hash = 0;
        for (int i = 0; i < chars.length; i = i + 1) {
            hash = 31 * hash + chars[i];
        }
        return hash;
    }

    public String toString() {
        return this;
    }

    public static String valueOf(char value) {
        char[] one = new char[1];
        one[0] = value;
        return new String(one);
    }

    public static String valueOf(boolean value) {
        if (value) {
            return "true";
        }
        return "false";
    }

    public static String valueOf(Object value) {
        if (value == null) {
            return "null";
        }
        return value.toString();
    }

    public static String valueOf(int value) {
        boolean negative = value < 0;
        int rest = value;
        if (!negative) {
            rest = -rest;
        }
        char[] buffer = new char[12];
        int at = 12;
        while (rest < 0 || at == 12) {
            at = at - 1;
            buffer[at] = (char) (48 - rest % 10);
            rest = rest / 10;
        }
        if (negative) {
            at = at - 1;
            buffer[at] = '-';
        }
        char[] digits = new char[12 - at];
        for (int i = at; i < 12; i = i + 1) {
            digits[i - at] = buffer[i];
        }
        return new String(digits);
    }
}
"#;

const SYSTEM: &str = r"
package java.lang;

public class System {
    public static java.io.OutputStream out = new java.io.OutputStream();

    public System() {}
}
";

const OUTPUT_STREAM: &str = r"
package java.io;

public class OutputStream {
    public OutputStream() {}

    public static native int nativeWrite(int b);

    public int write(int b) {
        return OutputStream.nativeWrite(b);
    }

    public int print(String text) {
        int i = 0;
        while (i < text.length()) {
            OutputStream.nativeWrite(text.charAt(i));
            i = i + 1;
        }
        return 0;
    }

    public int println(String text) {
        this.print(text);
        return OutputStream.nativeWrite(10);
    }
}
";

#[cfg(test)]
mod test {
    use crate::{ast::NodeIdGen, semantics::weeder, syntax};

    #[test]
    fn prelude_units_parse_and_weed_cleanly() {
        let mut ids = NodeIdGen::new();
        for (file, text) in super::units() {
            let unit = syntax::parse_source(file, text, &mut ids)
                .unwrap_or_else(|e| panic!("prelude {file}: {e}"));
            let diagnostics = weeder::weed(&unit);
            assert!(
                diagnostics.is_empty(),
                "prelude {file}: {:?}",
                diagnostics.items()
            );
        }
    }
}
