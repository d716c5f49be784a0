//! Assembles minimal but well-formed classfiles for tests.

use std::collections::HashMap;

pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<(String, String)>,
    methods: Vec<(String, String)>,
    inner_classes: Vec<(String, Option<String>)>,
    longs: Vec<i64>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            inner_classes: Vec::new(),
            longs: Vec::new(),
        }
    }

    pub fn no_super(mut self) -> Self {
        self.super_name = None;
        self
    }

    pub fn super_class(mut self, name: &str) -> Self {
        self.super_name = Some(name.to_string());
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str) -> Self {
        self.fields.push((name.to_string(), descriptor.to_string()));
        self
    }

    pub fn method(mut self, name: &str, descriptor: &str) -> Self {
        self.methods.push((name.to_string(), descriptor.to_string()));
        self
    }

    pub fn inner_class(mut self, inner: &str, outer: Option<&str>) -> Self {
        self.inner_classes
            .push((inner.to_string(), outer.map(str::to_string)));
        self
    }

    pub fn long_constant(mut self, value: i64) -> Self {
        self.longs.push(value);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pool = Pool::default();
        for value in &self.longs {
            pool.long(*value);
        }

        let this_index = pool.class(&self.name);
        let super_index = self.super_name.as_deref().map_or(0, |s| pool.class(s));
        let interfaces: Vec<u16> = self.interfaces.iter().map(|i| pool.class(i)).collect();
        let fields: Vec<(u16, u16)> = self
            .fields
            .iter()
            .map(|(n, d)| (pool.utf8(n), pool.utf8(d)))
            .collect();
        let code_name = pool.utf8("Code");
        let methods: Vec<(u16, u16)> = self
            .methods
            .iter()
            .map(|(n, d)| (pool.utf8(n), pool.utf8(d)))
            .collect();
        let source_file = pool.utf8("SourceFile");
        let source_value = pool.utf8("Fixture.java");
        let inner_attr = pool.utf8("InnerClasses");
        let inner: Vec<(u16, u16)> = self
            .inner_classes
            .iter()
            .map(|(i, o)| (pool.class(i), o.as_deref().map_or(0, |o| pool.class(o))))
            .collect();

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&pool.next.to_be_bytes());
        out.extend_from_slice(&pool.bytes);

        push_u16(&mut out, 0x0021);
        push_u16(&mut out, this_index);
        push_u16(&mut out, super_index);

        push_u16(&mut out, interfaces.len() as u16);
        for i in interfaces {
            push_u16(&mut out, i);
        }

        push_u16(&mut out, fields.len() as u16);
        for (name, desc) in fields {
            push_u16(&mut out, 0x0002);
            push_u16(&mut out, name);
            push_u16(&mut out, desc);
            push_u16(&mut out, 0);
        }

        push_u16(&mut out, methods.len() as u16);
        for (name, desc) in methods {
            push_u16(&mut out, 0x0001);
            push_u16(&mut out, name);
            push_u16(&mut out, desc);
            // One opaque Code attribute: `return` with zeroed stack/locals.
            push_u16(&mut out, 1);
            push_u16(&mut out, code_name);
            let code = [0u8, 1, 0, 1, 0, 0, 0, 1, 0xB1, 0, 0, 0, 0];
            out.extend_from_slice(&(code.len() as u32).to_be_bytes());
            out.extend_from_slice(&code);
        }

        let attribute_count = if inner.is_empty() { 1 } else { 2 };
        push_u16(&mut out, attribute_count);
        push_u16(&mut out, source_file);
        out.extend_from_slice(&2u32.to_be_bytes());
        push_u16(&mut out, source_value);

        if !inner.is_empty() {
            push_u16(&mut out, inner_attr);
            out.extend_from_slice(&(2 + 8 * inner.len() as u32).to_be_bytes());
            push_u16(&mut out, inner.len() as u16);
            for (inner_index, outer_index) in inner {
                push_u16(&mut out, inner_index);
                push_u16(&mut out, outer_index);
                push_u16(&mut out, 0);
                push_u16(&mut out, 0x0008);
            }
        }

        out
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

struct Pool {
    bytes: Vec<u8>,
    next: u16,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
}

impl Default for Pool {
    fn default() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            utf8: HashMap::new(),
            classes: HashMap::new(),
        }
    }
}

impl Pool {
    fn utf8(&mut self, s: &str) -> u16 {
        if let Some(index) = self.utf8.get(s) {
            return *index;
        }
        self.bytes.push(1);
        push_u16(&mut self.bytes, s.len() as u16);
        self.bytes.extend_from_slice(s.as_bytes());
        let index = self.next;
        self.next += 1;
        self.utf8.insert(s.to_string(), index);
        index
    }

    fn class(&mut self, name: &str) -> u16 {
        if let Some(index) = self.classes.get(name) {
            return *index;
        }
        let name_index = self.utf8(name);
        self.bytes.push(7);
        push_u16(&mut self.bytes, name_index);
        let index = self.next;
        self.next += 1;
        self.classes.insert(name.to_string(), index);
        index
    }

    fn long(&mut self, value: i64) {
        self.bytes.push(5);
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self.next += 2;
    }
}

/// Header and constant pool of a classfile whose last slot holds a Long,
/// leaving no room for its second half. Integers fill the earlier slots.
pub fn trailing_long_pool(pool_count: u16) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
    push_u16(&mut bytes, 0);
    push_u16(&mut bytes, 52);
    push_u16(&mut bytes, pool_count);
    for _ in 1..pool_count - 1 {
        bytes.push(3);
        bytes.extend_from_slice(&0i32.to_be_bytes());
    }
    bytes.push(5);
    bytes.extend_from_slice(&0i64.to_be_bytes());
    bytes
}
