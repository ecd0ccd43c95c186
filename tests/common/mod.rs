#![allow(dead_code)]

/// Builds class file bytes field by field, without going through the crate's
/// own writer.
pub struct ClassBuilder {
    magic: u32,
    pool: Vec<u8>,
    next_index: u16,
    this_class: u16,
    code_name: Option<u16>,
    methods: Vec<u8>,
    method_count: u16,
}

/// Constant pool index of the `Main` class entry in every built class.
pub const MAIN_CLASS: u16 = 2;

pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            magic: 0xCAFE_BABE,
            pool: Vec::new(),
            next_index: 1,
            this_class: 0,
            code_name: None,
            methods: Vec::new(),
            method_count: 0,
        };
        builder.this_class = builder.class(name);
        builder
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    fn entry(&mut self, tag: u8, payload: &[u8], slots: u16) -> u16 {
        let index = self.next_index;
        self.pool.push(tag);
        self.pool.extend_from_slice(payload);
        self.next_index += slots;
        index
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut payload = (s.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(s.as_bytes());
        self.entry(1, &payload, 1)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.entry(7, &name.to_be_bytes(), 1)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.entry(3, &value.to_be_bytes(), 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.entry(5, &value.to_be_bytes(), 2)
    }

    /// Adds a `public static` method, with a Code attribute when `code` is
    /// given as `(max_stack, max_locals, bytecode)`.
    pub fn method(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Option<(u16, u16, &[u8])>,
    ) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut m = Vec::new();
        m.extend_from_slice(&0x0009u16.to_be_bytes());
        m.extend_from_slice(&name.to_be_bytes());
        m.extend_from_slice(&descriptor.to_be_bytes());
        match code {
            None => m.extend_from_slice(&0u16.to_be_bytes()),
            Some((max_stack, max_locals, bytecode)) => {
                let code_name = match self.code_name {
                    Some(index) => index,
                    None => {
                        let index = self.utf8("Code");
                        self.code_name = Some(index);
                        index
                    }
                };
                m.extend_from_slice(&1u16.to_be_bytes());
                m.extend_from_slice(&code_name.to_be_bytes());
                let code_length = bytecode.len() as u32;
                m.extend_from_slice(&(12 + code_length).to_be_bytes());
                m.extend_from_slice(&max_stack.to_be_bytes());
                m.extend_from_slice(&max_locals.to_be_bytes());
                m.extend_from_slice(&code_length.to_be_bytes());
                m.extend_from_slice(bytecode);
                m.extend_from_slice(&0u16.to_be_bytes());
                m.extend_from_slice(&0u16.to_be_bytes());
            }
        }
        self.methods.extend_from_slice(&m);
        self.method_count += 1;
    }

    pub fn main(&mut self, max_stack: u16, bytecode: &[u8]) {
        self.method("main", MAIN_DESCRIPTOR, Some((max_stack, 1, bytecode)));
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.magic.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&52u16.to_be_bytes());
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&0x0021u16.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&self.method_count.to_be_bytes());
        out.extend_from_slice(&self.methods);
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

/// A `Main` class whose `main` method runs `bytecode`.
pub fn main_class(max_stack: u16, bytecode: &[u8]) -> Vec<u8> {
    let mut builder = ClassBuilder::new("Main");
    builder.main(max_stack, bytecode);
    builder.build()
}
